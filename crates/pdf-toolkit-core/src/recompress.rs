//! Embedded image recompression
//!
//! Every image reachable from the page tree is decoded, flattened to opaque
//! RGB and re-encoded as JPEG. The re-encoded bytes are kept only when they
//! are strictly smaller than what the document already stores, so no image
//! ever grows. Images with a color key or stencil `Mask` are left alone.

use image::{DynamicImage, RgbImage};

use crate::codec::{JpegCodec, RasterCodec};
use crate::document::Document;
use crate::error::{CodecError, PdfToolkitError, Result};
use crate::images::ReplacementImage;
use crate::report::{RecompressionReport, Warning};

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 95;

pub struct Recompressor<C = JpegCodec> {
    codec: C,
}

impl Default for Recompressor<JpegCodec> {
    fn default() -> Self {
        Self::new(JpegCodec)
    }
}

impl<C: RasterCodec> Recompressor<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn recompress_all(&self, doc: &mut Document, quality: u8) -> Result<RecompressionReport> {
        validate_quality(quality)?;

        let images = doc.image_resources();
        let mut report = RecompressionReport {
            images_found: images.len(),
            ..Default::default()
        };

        for id in images {
            let outcome = self.try_recompress(doc, id, quality);
            match outcome {
                Ok(Some((replacement, stored_len))) => {
                    let saved = stored_len - replacement.jpeg.len();
                    doc.replace_image(id, replacement)?;
                    report.images_replaced += 1;
                    report.bytes_saved += saved;
                    tracing::debug!(object = ?id, saved, "image replaced");
                }
                Ok(None) => {
                    tracing::debug!(object = ?id, "re-encoded image not smaller, kept original");
                }
                Err(e) => report.warnings.push(
                    Warning::ImageSkipped {
                        object: id,
                        reason: e.to_string(),
                    }
                    .logged(),
                ),
            }
        }

        tracing::info!(
            found = report.images_found,
            replaced = report.images_replaced,
            bytes_saved = report.bytes_saved,
            "recompression complete"
        );
        Ok(report)
    }

    /// The replacement for one image, or `None` when it would not be smaller.
    fn try_recompress(
        &self,
        doc: &Document,
        id: lopdf::ObjectId,
        quality: u8,
    ) -> std::result::Result<Option<(ReplacementImage, usize)>, CodecError> {
        let resource = doc.image_resource(id)?;
        let decoded = self.codec.decode(&resource)?;
        let rgb = flatten_to_rgb(decoded);
        let jpeg = self.codec.encode_lossy(&rgb, quality)?;

        if jpeg.len() >= resource.stored_len {
            return Ok(None);
        }
        Ok(Some((
            ReplacementImage {
                jpeg,
                width: rgb.width(),
                height: rgb.height(),
            },
            resource.stored_len,
        )))
    }
}

/// Recompress with the default JPEG codec.
pub fn recompress_all(doc: &mut Document, quality: u8) -> Result<RecompressionReport> {
    Recompressor::default().recompress_all(doc, quality)
}

/// Load, recompress and serialize in one step.
pub fn compress_document(bytes: &[u8], quality: u8) -> Result<(Vec<u8>, RecompressionReport)> {
    validate_quality(quality)?;
    let mut doc = Document::load(bytes)?;
    let report = recompress_all(&mut doc, quality)?;
    Ok((doc.to_bytes()?, report))
}

fn validate_quality(quality: u8) -> Result<()> {
    if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        return Err(PdfToolkitError::Validation(format!(
            "Quality must be between {} and {}, got {}",
            MIN_QUALITY, MAX_QUALITY, quality
        )));
    }
    Ok(())
}

/// Opaque RGB, compositing any alpha over white.
fn flatten_to_rgb(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let over_white = |c: u8| ((c as u16 * a as u16 + 255 * (255 - a as u16)) / 255) as u8;
        dst.0 = [over_white(r), over_white(g), over_white(b)];
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::*;
    use crate::images::fixtures::*;
    use image::Rgba;
    use lopdf::{Object, ObjectId, Stream};
    use pretty_assertions::assert_eq;

    fn stored_len(doc: &Document, id: ObjectId) -> usize {
        doc.inner.get_object(id).unwrap().as_stream().unwrap().content.len()
    }

    #[test]
    fn test_quality_bounds() {
        let mut doc = Document::load(&create_test_pdf(1, "Q")).unwrap();
        for quality in [0, 96, 100] {
            assert!(matches!(
                recompress_all(&mut doc, quality),
                Err(PdfToolkitError::Validation(_))
            ));
        }
        assert!(recompress_all(&mut doc, 1).is_ok());
        assert!(recompress_all(&mut doc, 95).is_ok());
    }

    #[test]
    fn test_flatten_composites_over_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        let rgb = flatten_to_rgb(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.as_raw(), &vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_raw_image_is_replaced_with_smaller_jpeg() {
        let mut raw = shared_font_doc(1, "Raw");
        let id = add_image(&mut raw, "Im1", raw_rgb_image(64, 64));
        let mut doc = Document::load(&save(&mut raw)).unwrap();
        let before = stored_len(&doc, id);

        let report = recompress_all(&mut doc, 50).unwrap();
        assert_eq!(report.images_found, 1);
        assert_eq!(report.images_replaced, 1);
        assert!(report.warnings.is_empty());

        let after = stored_len(&doc, id);
        assert!(after < before);
        assert_eq!(report.bytes_saved, before - after);
    }

    #[test]
    fn test_flate_rgba_image_is_flattened() {
        let (w, h) = (48u32, 48u32);
        let mut raw = shared_font_doc(1, "Alpha");
        let alpha: Vec<u8> = (0..w * h).map(|i| (i % 256) as u8).collect();
        let mask_id = raw.add_object(Stream::new(
            image_dict(w, h, Object::Name(b"DeviceGray".to_vec()), 8),
            alpha,
        ));
        let mut image = raw_rgb_image(w, h);
        image.dict.set("SMask", Object::Reference(mask_id));
        let content = image.content.clone();
        image.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        image.set_content(deflate(&content));
        let id = add_image(&mut raw, "Im1", image);
        let mut doc = Document::load(&save(&mut raw)).unwrap();
        let before = stored_len(&doc, id);

        let report = recompress_all(&mut doc, 30).unwrap();
        let after = stored_len(&doc, id);
        assert!(after <= before);
        if report.images_replaced == 1 {
            let dict = &doc.inner.get_object(id).unwrap().as_stream().unwrap().dict;
            assert!(!dict.has(b"SMask"));
        }
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_small_jpeg_at_high_quality_is_kept() {
        let source = RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
        let jpeg = JpegCodec.encode_lossy(&source, 10).unwrap();

        let mut dict = image_dict(32, 32, Object::Name(b"DeviceRGB".to_vec()), 8);
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        let mut raw = shared_font_doc(1, "Jpeg");
        let id = add_image(&mut raw, "Im1", Stream::new(dict, jpeg.clone()));
        let mut doc = Document::load(&save(&mut raw)).unwrap();

        let report = recompress_all(&mut doc, 95).unwrap();
        assert_eq!(report.images_replaced, 0);
        assert_eq!(report.bytes_saved, 0);
        let stored = doc.inner.get_object(id).unwrap().as_stream().unwrap();
        assert_eq!(stored.content, jpeg);
    }

    #[test]
    fn test_shared_image_counted_once() {
        let mut raw = shared_font_doc(3, "Shared");
        add_image(&mut raw, "Im1", raw_rgb_image(32, 32));
        let mut doc = Document::load(&save(&mut raw)).unwrap();
        let report = recompress_all(&mut doc, 50).unwrap();
        assert_eq!(report.images_found, 1);
    }

    #[test]
    fn test_unsupported_image_is_skipped_with_warning() {
        let mut dict = image_dict(8, 8, Object::Name(b"DeviceGray".to_vec()), 1);
        dict.set("Filter", Object::Name(b"JBIG2Decode".to_vec()));
        let mut raw = shared_font_doc(1, "Jbig");
        let id = add_image(&mut raw, "Im1", Stream::new(dict, vec![0; 8]));
        add_image(&mut raw, "Im2", raw_rgb_image(64, 64));
        let mut doc = Document::load(&save(&mut raw)).unwrap();

        let report = recompress_all(&mut doc, 50).unwrap();
        assert_eq!(report.images_found, 2);
        assert_eq!(report.images_replaced, 1);
        assert_eq!(report.warnings.len(), 1);
        match &report.warnings[0] {
            Warning::ImageSkipped { object, reason } => {
                assert_eq!(*object, id);
                assert!(reason.contains("JBIG2Decode"));
            }
            other => panic!("unexpected warning {:?}", other),
        }
    }

    #[test]
    fn test_overflowing_predictor_is_skipped_while_others_compress() {
        let mut dict = image_dict(64, 64, Object::Name(b"DeviceRGB".to_vec()), 8);
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        dict.set(
            "DecodeParms",
            Object::Dictionary(lopdf::Dictionary::from_iter(vec![
                ("Predictor", Object::Integer(12)),
                ("Colors", Object::Integer(1 << 31)),
                ("BitsPerComponent", Object::Integer(1 << 31)),
                ("Columns", Object::Integer(1 << 31)),
            ])),
        );
        let mut raw = shared_font_doc(1, "Pred");
        let bad = add_image(&mut raw, "Im1", Stream::new(dict, deflate(&[0; 256])));
        let good = add_image(&mut raw, "Im2", raw_rgb_image(64, 64));
        let mut doc = Document::load(&save(&mut raw)).unwrap();
        let before = stored_len(&doc, bad);

        let report = recompress_all(&mut doc, 50).unwrap();
        assert_eq!(report.images_found, 2);
        assert_eq!(report.images_replaced, 1);
        assert_eq!(
            report.warnings,
            vec![Warning::ImageSkipped {
                object: bad,
                reason: "corrupt image data: predictor parameters overflow".into(),
            }]
        );
        assert_eq!(stored_len(&doc, bad), before);
        assert!(stored_len(&doc, good) < 64 * 64 * 3);
    }

    #[test]
    fn test_masked_images_keep_their_transparency() {
        let mut raw = shared_font_doc(1, "Masked");
        let mut keyed = raw_rgb_image(64, 64);
        keyed.dict.set(
            "Mask",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(0),
            ]),
        );
        let keyed = add_image(&mut raw, "Im1", keyed);

        let mut mask_dict = image_dict(64, 64, Object::Null, 1);
        mask_dict.remove(b"ColorSpace");
        mask_dict.set("ImageMask", Object::Boolean(true));
        let mask_id = raw.add_object(Stream::new(mask_dict, vec![0xAA; 8 * 64]));
        let mut stenciled = raw_rgb_image(64, 64);
        stenciled.dict.set("Mask", Object::Reference(mask_id));
        let stenciled = add_image(&mut raw, "Im2", stenciled);
        let mut doc = Document::load(&save(&mut raw)).unwrap();

        let report = recompress_all(&mut doc, 50).unwrap();
        assert_eq!(report.images_found, 2);
        assert_eq!(report.images_replaced, 0);
        let skipped: Vec<ObjectId> = report
            .warnings
            .iter()
            .map(|w| match w {
                Warning::ImageSkipped { object, .. } => *object,
                other => panic!("unexpected warning {:?}", other),
            })
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped.contains(&keyed) && skipped.contains(&stenciled));
        assert_eq!(stored_len(&doc, keyed), 64 * 64 * 3);
        assert_eq!(stored_len(&doc, stenciled), 64 * 64 * 3);
    }

    struct FailingCodec;

    impl RasterCodec for FailingCodec {
        fn decode(&self, _: &crate::images::ImageResource) -> std::result::Result<DynamicImage, CodecError> {
            Err(CodecError::Decode("no".into()))
        }

        fn encode_lossy(&self, _: &RgbImage, _: u8) -> std::result::Result<Vec<u8>, CodecError> {
            unreachable!()
        }
    }

    #[test]
    fn test_custom_codec_failures_leave_images_untouched() {
        let mut raw = shared_font_doc(1, "Fail");
        let id = add_image(&mut raw, "Im1", raw_rgb_image(16, 16));
        let mut doc = Document::load(&save(&mut raw)).unwrap();
        let before = stored_len(&doc, id);

        let report = Recompressor::new(FailingCodec)
            .recompress_all(&mut doc, 50)
            .unwrap();
        assert_eq!(report.images_replaced, 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(stored_len(&doc, id), before);
    }

    #[test]
    fn test_compress_document_round_trip() {
        let mut raw = shared_font_doc(2, "Cmp");
        add_image(&mut raw, "Im1", raw_rgb_image(64, 64));
        let input = save(&mut raw);

        let (output, report) = compress_document(&input, 50).unwrap();
        assert_eq!(report.images_replaced, 1);
        assert!(output.len() < input.len());
        let reloaded = Document::load(&output).unwrap();
        assert_eq!(reloaded.page_count(), 2);
        assert!(page_text(&reloaded, 1).contains("Cmp-Page-2"));
    }
}
