//! Raster codec
//!
//! [`RasterCodec`] turns an [`ImageResource`] into pixels and pixels into
//! lossy bytes. [`JpegCodec`] is the default, built on the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};

use crate::error::CodecError;
use crate::images::{ColorMode, ImageResource, Palette, PaletteBase, PixelData};

pub trait RasterCodec {
    /// Decode to pixels, attaching the alpha plane when there is one.
    fn decode(&self, image: &ImageResource) -> Result<DynamicImage, CodecError>;

    /// Encode an opaque RGB image at `quality` (1-95).
    fn encode_lossy(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl RasterCodec for JpegCodec {
    fn decode(&self, image: &ImageResource) -> Result<DynamicImage, CodecError> {
        let (width, height) = (image.width, image.height);
        let color = match &image.pixels {
            PixelData::Jpeg(bytes) => decode_jpeg(bytes, width, height)?,
            PixelData::Samples {
                data,
                bits_per_component,
            } => match (&image.palette, image.color_mode) {
                (Some(palette), _) => {
                    let indices = unpack(data, width, height, 1, *bits_per_component, false)?;
                    return expand_palette(palette, &indices, image, width, height);
                }
                (None, mode) => samples_to_image(mode, data, *bits_per_component, width, height)?,
            },
        };

        match &image.alpha {
            Some(plane) => attach_alpha(color, alpha_plane(plane, width, height)?),
            None => Ok(color),
        }
    }

    fn encode_lossy(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality)
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buffer)
    }
}

fn decode_jpeg(bytes: &[u8], width: u32, height: u32) -> Result<DynamicImage, CodecError> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    if (decoded.width(), decoded.height()) != (width, height) {
        return Err(CodecError::Corrupt(format!(
            "JPEG is {}x{}, dictionary says {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        )));
    }
    Ok(decoded)
}

/// Unpack rows of `components`-wide samples to one byte per sample.
///
/// With `scale` the samples are stretched to the full 0-255 range; without
/// it (palette indices) they keep their numeric value.
fn unpack(
    data: &[u8],
    width: u32,
    height: u32,
    components: usize,
    bits: u8,
    scale: bool,
) -> Result<Vec<u8>, CodecError> {
    let oversized = || CodecError::Corrupt(format!("{}x{} image is too large", width, height));
    let samples_per_row = (width as usize)
        .checked_mul(components)
        .ok_or_else(oversized)?;
    let row_bytes = samples_per_row
        .checked_mul(bits as usize)
        .ok_or_else(oversized)?
        .div_ceil(8);
    let needed = row_bytes
        .checked_mul(height as usize)
        .ok_or_else(oversized)?;
    if data.len() < needed {
        return Err(CodecError::Corrupt(format!(
            "expected {} bytes of samples, found {}",
            needed,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(needed);
    for row in data[..needed].chunks(row_bytes) {
        match bits {
            8 => out.extend_from_slice(&row[..samples_per_row]),
            // Big-endian; keep the high byte.
            16 => out.extend(row.chunks(2).take(samples_per_row).map(|pair| pair[0])),
            1 | 2 | 4 => {
                let max = (1u16 << bits) - 1;
                let per_byte = 8 / bits as usize;
                for i in 0..samples_per_row {
                    let byte = row[i / per_byte];
                    let shift = 8 - bits as usize * (i % per_byte + 1);
                    let value = (byte >> shift) as u16 & max;
                    out.push(if scale {
                        (value * 255 / max) as u8
                    } else {
                        value as u8
                    });
                }
            }
            other => {
                return Err(CodecError::UnsupportedLayout(format!(
                    "{} bits per component",
                    other
                )))
            }
        }
    }
    Ok(out)
}

fn samples_to_image(
    mode: ColorMode,
    data: &[u8],
    bits: u8,
    width: u32,
    height: u32,
) -> Result<DynamicImage, CodecError> {
    let size_error = || CodecError::Corrupt("sample buffer does not match dimensions".into());
    match mode {
        ColorMode::Gray | ColorMode::GrayAlpha => {
            let samples = unpack(data, width, height, 1, bits, true)?;
            GrayImage::from_raw(width, height, samples)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(size_error)
        }
        ColorMode::Rgb | ColorMode::Rgba => {
            let samples = unpack(data, width, height, 3, bits, true)?;
            RgbImage::from_raw(width, height, samples)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(size_error)
        }
        ColorMode::Cmyk => {
            let samples = unpack(data, width, height, 4, bits, true)?;
            let rgb = samples.chunks(4).flat_map(cmyk_to_rgb).collect();
            RgbImage::from_raw(width, height, rgb)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(size_error)
        }
        ColorMode::Indexed => Err(CodecError::Corrupt("indexed image without palette".into())),
    }
}

fn cmyk_to_rgb(cmyk: &[u8]) -> [u8; 3] {
    let k = 255 - cmyk[3] as u16;
    let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
}

fn expand_palette(
    palette: &Palette,
    indices: &[u8],
    image: &ImageResource,
    width: u32,
    height: u32,
) -> Result<DynamicImage, CodecError> {
    let alpha = match &image.alpha {
        Some(plane) => Some(alpha_plane(plane, width, height)?),
        None => None,
    };
    let components = palette.base.components();
    let entry_count = palette.entries.len() / components;

    let mut rgba = Vec::with_capacity(indices.len() * 4);
    for (i, &index) in indices.iter().enumerate() {
        // Out-of-range indices clamp to the last entry.
        let index = (index as usize).min(entry_count.saturating_sub(1));
        let entry = &palette.entries[index * components..(index + 1) * components];
        let [r, g, b] = match palette.base {
            PaletteBase::Gray => [entry[0]; 3],
            PaletteBase::Rgb => [entry[0], entry[1], entry[2]],
            PaletteBase::Cmyk => cmyk_to_rgb(entry),
        };
        let a = alpha.as_ref().map_or(255, |plane| plane.as_raw()[i]);
        rgba.extend_from_slice(&[r, g, b, a]);
    }

    RgbaImage::from_raw(width, height, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| CodecError::Corrupt("palette image does not match dimensions".into()))
}

fn alpha_plane(plane: &PixelData, width: u32, height: u32) -> Result<GrayImage, CodecError> {
    match plane {
        PixelData::Jpeg(bytes) => Ok(decode_jpeg(bytes, width, height)?.to_luma8()),
        PixelData::Samples {
            data,
            bits_per_component,
        } => {
            let samples = unpack(data, width, height, 1, *bits_per_component, true)?;
            GrayImage::from_raw(width, height, samples)
                .ok_or_else(|| CodecError::Corrupt("soft mask does not match dimensions".into()))
        }
    }
}

fn attach_alpha(color: DynamicImage, alpha: GrayImage) -> Result<DynamicImage, CodecError> {
    let alpha = alpha.into_raw();
    let (width, height) = (color.width(), color.height());
    let size_error = || CodecError::Corrupt("soft mask does not match image".into());

    match color {
        DynamicImage::ImageLuma8(gray) => {
            let data = gray
                .into_raw()
                .into_iter()
                .zip(alpha)
                .flat_map(|(l, a)| [l, a])
                .collect();
            GrayAlphaImage::from_raw(width, height, data)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(size_error)
        }
        other => {
            let data = other
                .to_rgb8()
                .into_raw()
                .chunks(3)
                .zip(alpha)
                .flat_map(|(rgb, a)| [rgb[0], rgb[1], rgb[2], a])
                .collect();
            RgbaImage::from_raw(width, height, data)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(size_error)
        }
    }
}
