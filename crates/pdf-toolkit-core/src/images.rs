//! Embedded raster images
//!
//! The document side of recompression: finding image XObjects reachable from
//! page resources, lifting one into a self-contained [`ImageResource`] the
//! codec can work on, and swapping re-encoded bytes back in.

use std::collections::BTreeSet;
use std::io::Read;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Object, ObjectId, Stream};

use crate::document::{integer_of, name_of, page_resources, resolve, resolve_dict, Document};
use crate::error::{CodecError, PdfToolkitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Gray,
    GrayAlpha,
    Indexed,
    Rgb,
    Rgba,
    Cmyk,
}

impl ColorMode {
    pub fn has_alpha(self) -> bool {
        matches!(self, ColorMode::GrayAlpha | ColorMode::Rgba)
    }
}

/// Color space a palette maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteBase {
    Gray,
    Rgb,
    Cmyk,
}

impl PaletteBase {
    pub fn components(self) -> usize {
        match self {
            PaletteBase::Gray => 1,
            PaletteBase::Rgb => 3,
            PaletteBase::Cmyk => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub base: PaletteBase,
    /// Packed entries, `base.components()` bytes each.
    pub entries: Vec<u8>,
}

/// Pixel payload as stored, after undoing general-purpose compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelData {
    /// A complete JPEG file (`DCTDecode`).
    Jpeg(Vec<u8>),
    /// Packed samples, rows padded to a byte boundary.
    Samples {
        data: Vec<u8>,
        bits_per_component: u8,
    },
}

/// A raster image lifted out of the document.
#[derive(Debug, Clone)]
pub struct ImageResource {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
    pub color_mode: ColorMode,
    pub pixels: PixelData,
    pub palette: Option<Palette>,
    /// Soft mask plane at the image's dimensions, one gray component.
    pub alpha: Option<PixelData>,
    /// Length of the bytes stored in the document for this image.
    pub stored_len: usize,
}

/// Re-encoded image bytes to store in place of an existing image.
#[derive(Debug, Clone)]
pub struct ReplacementImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Document {
    /// Image XObjects referenced from any page, each listed once.
    ///
    /// Form XObjects are searched recursively.
    pub fn image_resources(&self) -> Vec<ObjectId> {
        let mut images = BTreeSet::new();
        let mut forms = BTreeSet::new();
        for page_id in self.page_ids() {
            if let Some(resources) = page_resources(&self.inner, page_id) {
                collect_images(&self.inner, resources, &mut images, &mut forms);
            }
        }
        images.into_iter().collect()
    }

    pub fn image_resource(&self, id: ObjectId) -> std::result::Result<ImageResource, CodecError> {
        let stream = self
            .inner
            .get_object(id)
            .and_then(Object::as_stream)
            .map_err(|_| CodecError::Corrupt("image object is not a stream".into()))?;
        extract_image(&self.inner, id, stream)
    }

    /// Store `replacement` as the image with the given id.
    ///
    /// The image dictionary is rewritten for a baseline RGB JPEG. Soft masks
    /// are dropped since the replacement has been flattened.
    pub fn replace_image(&mut self, id: ObjectId, replacement: ReplacementImage) -> Result<()> {
        let stream = self
            .inner
            .get_object_mut(id)
            .and_then(Object::as_stream_mut)
            .map_err(|_| PdfToolkitError::Operation(format!("Image {:?} is not a stream", id)))?;

        let dict = &mut stream.dict;
        let dropped: [&[u8]; 4] = [b"DecodeParms", b"SMask", b"Mask", b"Decode"];
        for key in dropped {
            dict.remove(key);
        }
        dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        dict.set("BitsPerComponent", Object::Integer(8));
        dict.set("Width", Object::Integer(replacement.width as i64));
        dict.set("Height", Object::Integer(replacement.height as i64));
        stream.set_content(replacement.jpeg);
        Ok(())
    }
}

fn collect_images(
    doc: &lopdf::Document,
    resources: &Dictionary,
    images: &mut BTreeSet<ObjectId>,
    forms: &mut BTreeSet<ObjectId>,
) {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
    else {
        return;
    };

    for (_, value) in xobjects.iter() {
        let Ok(id) = value.as_reference() else {
            continue;
        };
        let Ok(stream) = doc.get_object(id).and_then(Object::as_stream) else {
            continue;
        };
        match stream.dict.get(b"Subtype").ok().and_then(name_of) {
            Some(b"Image") => {
                images.insert(id);
            }
            Some(b"Form") => {
                if !forms.insert(id) {
                    continue;
                }
                if let Some(nested) = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|o| resolve_dict(doc, o))
                {
                    collect_images(doc, nested, images, forms);
                }
            }
            _ => {}
        }
    }
}

fn extract_image(
    doc: &lopdf::Document,
    id: ObjectId,
    stream: &Stream,
) -> std::result::Result<ImageResource, CodecError> {
    let dict = &stream.dict;

    if dict
        .get(b"ImageMask")
        .ok()
        .and_then(|o| resolve(doc, o))
        .is_some_and(|o| matches!(o, Object::Boolean(true)))
    {
        return Err(CodecError::UnsupportedLayout("stencil mask".into()));
    }
    if dict.has(b"Decode") {
        return Err(CodecError::UnsupportedLayout("custom decode array".into()));
    }
    // Transparency that JPEG output cannot keep.
    match dict.get(b"Mask").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Array(_)) => {
            return Err(CodecError::UnsupportedLayout("color key mask".into()))
        }
        Some(_) => return Err(CodecError::UnsupportedLayout("explicit stencil mask".into())),
        None => {}
    }

    let width = dimension(doc, dict, b"Width")?;
    let height = dimension(doc, dict, b"Height")?;
    let pixels = decode_filters(doc, stream)?;

    let color_space = dict.get(b"ColorSpace").ok().and_then(|o| resolve(doc, o));
    let (base, palette) = match (color_space, &pixels) {
        (Some(space), _) => color_space_of(doc, space)?,
        // JPEG carries its own component layout.
        (None, PixelData::Jpeg(_)) => (ColorMode::Rgb, None),
        (None, PixelData::Samples { .. }) => {
            return Err(CodecError::UnsupportedColorSpace("missing".into()))
        }
    };

    let alpha = match dict.get(b"SMask").ok() {
        Some(Object::Reference(mask_id)) => Some(extract_alpha(doc, *mask_id, width, height)?),
        _ => None,
    };

    let color_mode = match (base, alpha.is_some()) {
        (ColorMode::Gray, true) => ColorMode::GrayAlpha,
        (ColorMode::Rgb, true) => ColorMode::Rgba,
        (mode, _) => mode,
    };

    Ok(ImageResource {
        id,
        width,
        height,
        color_mode,
        pixels,
        palette,
        alpha,
        stored_len: stream.content.len(),
    })
}

fn extract_alpha(
    doc: &lopdf::Document,
    mask_id: ObjectId,
    width: u32,
    height: u32,
) -> std::result::Result<PixelData, CodecError> {
    let mask = doc
        .get_object(mask_id)
        .and_then(Object::as_stream)
        .map_err(|_| CodecError::Corrupt("soft mask is not a stream".into()))?;
    if dimension(doc, &mask.dict, b"Width")? != width
        || dimension(doc, &mask.dict, b"Height")? != height
    {
        return Err(CodecError::UnsupportedLayout(
            "soft mask size differs from image".into(),
        ));
    }
    decode_filters(doc, mask)
}

fn dimension(
    doc: &lopdf::Document,
    dict: &Dictionary,
    key: &[u8],
) -> std::result::Result<u32, CodecError> {
    dict.get(key)
        .ok()
        .and_then(|o| integer_of(doc, o))
        .and_then(|v| u32::try_from(v).ok())
        .filter(|&v| v > 0)
        .ok_or_else(|| {
            CodecError::Corrupt(format!("invalid {}", String::from_utf8_lossy(key)))
        })
}

fn bits_per_component(doc: &lopdf::Document, dict: &Dictionary) -> std::result::Result<u8, CodecError> {
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| integer_of(doc, o))
        .unwrap_or(8);
    match bits {
        1 | 2 | 4 | 8 | 16 => Ok(bits as u8),
        other => Err(CodecError::UnsupportedLayout(format!(
            "{} bits per component",
            other
        ))),
    }
}

fn filter_names(doc: &lopdf::Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter").ok().and_then(|o| resolve(doc, o)) {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|o| resolve(doc, o).and_then(name_of).map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// Decode parameters paired with the filter at `position`.
fn decode_params<'a>(doc: &'a lopdf::Document, dict: &'a Dictionary, position: usize) -> Option<&'a Dictionary> {
    match dict.get(b"DecodeParms").ok().and_then(|o| resolve(doc, o))? {
        Object::Dictionary(params) if position == 0 => Some(params),
        Object::Array(items) => items.get(position).and_then(|o| resolve_dict(doc, o)),
        _ => None,
    }
}

/// Undo every filter except the final image codec.
fn decode_filters(doc: &lopdf::Document, stream: &Stream) -> std::result::Result<PixelData, CodecError> {
    let filters = filter_names(doc, &stream.dict);
    let width = stream.dict.get(b"Width").ok().and_then(|o| integer_of(doc, o));
    let mut data = stream.content.clone();

    for (position, filter) in filters.iter().enumerate() {
        match filter.as_slice() {
            b"FlateDecode" | b"Fl" => {
                data = inflate(&data)?;
                if let Some(params) = decode_params(doc, &stream.dict, position) {
                    data = unpredict(doc, params, width, data)?;
                }
            }
            b"DCTDecode" | b"DCT" if position + 1 == filters.len() => {
                return Ok(PixelData::Jpeg(data));
            }
            other => {
                return Err(CodecError::UnsupportedFilter(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        }
    }

    Ok(PixelData::Samples {
        data,
        bits_per_component: bits_per_component(doc, &stream.dict)?,
    })
}

fn inflate(data: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| CodecError::Corrupt(format!("flate: {}", e)))?;
    Ok(decoded)
}

/// Reverse PNG row predictors (`Predictor` >= 10).
///
/// `Columns` is capped at the image `width` when one is known.
fn unpredict(
    doc: &lopdf::Document,
    params: &Dictionary,
    width: Option<i64>,
    data: Vec<u8>,
) -> std::result::Result<Vec<u8>, CodecError> {
    let param = |key: &[u8], default: i64| {
        params
            .get(key)
            .ok()
            .and_then(|o| integer_of(doc, o))
            .unwrap_or(default)
    };
    let predictor = param(b"Predictor", 1);
    if predictor == 1 {
        return Ok(data);
    }
    if predictor < 10 {
        return Err(CodecError::UnsupportedLayout(format!(
            "predictor {}",
            predictor
        )));
    }

    let colors = param(b"Colors", 1).max(1);
    let bits = param(b"BitsPerComponent", 8).max(1);
    let mut columns = param(b"Columns", 1).max(1);
    if let Some(width) = width {
        columns = columns.min(width.max(1));
    }

    let oversized = || CodecError::Corrupt("predictor parameters overflow".into());
    let to_bytes = |total_bits: i64| {
        total_bits
            .checked_add(7)
            .and_then(|b| usize::try_from(b / 8).ok())
            .ok_or_else(oversized)
    };
    let pixel_bits = colors.checked_mul(bits).ok_or_else(oversized)?;
    let bpp = to_bytes(pixel_bits)?.max(1);
    let row_len = to_bytes(pixel_bits.checked_mul(columns).ok_or_else(oversized)?)?;
    if row_len >= data.len() {
        return Err(CodecError::Corrupt(format!(
            "predictor row of {} bytes in {} bytes of data",
            row_len,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        if chunk.len() < 2 {
            break;
        }
        let (kind, encoded) = (chunk[0], &chunk[1..]);
        let mut row = encoded.to_vec();
        row.resize(row_len, 0);
        for i in 0..row_len {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = previous[i];
            let upper_left = if i >= bpp { previous[i - bpp] } else { 0 };
            row[i] = match kind {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, upper_left)),
                other => {
                    return Err(CodecError::Corrupt(format!("PNG filter type {}", other)))
                }
            };
        }
        out.extend_from_slice(&row);
        previous = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn color_space_of(
    doc: &lopdf::Document,
    space: &Object,
) -> std::result::Result<(ColorMode, Option<Palette>), CodecError> {
    match space {
        Object::Name(name) => device_space(name).map(|mode| (mode, None)),
        Object::Array(items) => {
            let family = items.first().and_then(name_of).unwrap_or_default();
            match family {
                b"ICCBased" => {
                    let components = items
                        .get(1)
                        .and_then(|o| resolve(doc, o))
                        .and_then(|o| o.as_stream().ok())
                        .and_then(|s| s.dict.get(b"N").ok())
                        .and_then(|o| integer_of(doc, o));
                    match components {
                        Some(1) => Ok((ColorMode::Gray, None)),
                        Some(3) => Ok((ColorMode::Rgb, None)),
                        Some(4) => Ok((ColorMode::Cmyk, None)),
                        _ => Err(CodecError::UnsupportedColorSpace("ICCBased".into())),
                    }
                }
                b"CalGray" => Ok((ColorMode::Gray, None)),
                b"CalRGB" => Ok((ColorMode::Rgb, None)),
                b"Indexed" | b"I" => indexed_palette(doc, items).map(|p| (ColorMode::Indexed, Some(p))),
                other => Err(CodecError::UnsupportedColorSpace(
                    String::from_utf8_lossy(other).into_owned(),
                )),
            }
        }
        _ => Err(CodecError::UnsupportedColorSpace("malformed".into())),
    }
}

fn device_space(name: &[u8]) -> std::result::Result<ColorMode, CodecError> {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorMode::Gray),
        b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorMode::Rgb),
        b"DeviceCMYK" | b"CMYK" => Ok(ColorMode::Cmyk),
        other => Err(CodecError::UnsupportedColorSpace(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// `[/Indexed base hival lookup]`
fn indexed_palette(doc: &lopdf::Document, items: &[Object]) -> std::result::Result<Palette, CodecError> {
    let [_, base, hival, lookup] = items else {
        return Err(CodecError::UnsupportedColorSpace("malformed Indexed".into()));
    };
    let base = match resolve(doc, base).map(|o| color_space_of(doc, o)) {
        Some(Ok((ColorMode::Gray, None))) => PaletteBase::Gray,
        Some(Ok((ColorMode::Rgb, None))) => PaletteBase::Rgb,
        Some(Ok((ColorMode::Cmyk, None))) => PaletteBase::Cmyk,
        _ => return Err(CodecError::UnsupportedColorSpace("Indexed base".into())),
    };
    let hival = integer_of(doc, hival)
        .filter(|v| (0..=255).contains(v))
        .ok_or_else(|| CodecError::Corrupt("Indexed hival".into()))? as usize;

    let mut entries = match resolve(doc, lookup) {
        Some(Object::String(bytes, _)) => bytes.clone(),
        Some(Object::Stream(stream)) => match decode_filters(doc, stream)? {
            PixelData::Samples { data, .. } => data,
            PixelData::Jpeg(_) => {
                return Err(CodecError::Corrupt("Indexed lookup is a JPEG".into()))
            }
        },
        _ => return Err(CodecError::Corrupt("Indexed lookup".into())),
    };

    let needed = (hival + 1) * base.components();
    if entries.len() < needed {
        return Err(CodecError::Corrupt("Indexed lookup too short".into()));
    }
    entries.truncate(needed);
    Ok(Palette { base, entries })
}
