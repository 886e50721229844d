use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

use super::adjustments::AdjustmentSet;

const MIDPOINT: f32 = 128.0;
const TONE_SPLIT: f32 = 0.5;
const TONE_RANGE_SCALE: f32 = 80.0;
const EXTREME_RANGE_SCALE: f32 = 60.0;
const CLARITY_SCALE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, GradingError> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgb8())
        .map_err(GradingError::Decode)
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, GradingError> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(GradingError::Encode)?;
    Ok(out)
}

/// Applies the directives in a fixed order: exposure, contrast, tonal
/// split on post-contrast luma, clarity, warmth, clamp, then saturation.
pub fn grade_image(image: &RgbImage, adjustments: &AdjustmentSet) -> RgbImage {
    let exposure_gain = 1.0 + adjustments.exposure.unwrap_or(0.0);
    let contrast = adjustments.contrast.unwrap_or(1.0);
    let warmth = adjustments.warmth.unwrap_or(1.0);
    let bright_delta = tone_delta(adjustments.highlights, TONE_RANGE_SCALE)
        + tone_delta(adjustments.whites, EXTREME_RANGE_SCALE);
    let dark_delta = tone_delta(adjustments.shadows, TONE_RANGE_SCALE)
        + tone_delta(adjustments.blacks, EXTREME_RANGE_SCALE);
    let clarity_factor = adjustments
        .clarity
        .filter(|v| *v != 0.0)
        .map(|v| 1.0 + (v / 100.0) * CLARITY_SCALE);

    let mut out = RgbImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        let mut rgb = [
            f32::from(src[0]),
            f32::from(src[1]),
            f32::from(src[2]),
        ];

        for channel in rgb.iter_mut() {
            *channel *= exposure_gain;
            *channel = (*channel - MIDPOINT) * contrast + MIDPOINT;
        }

        let luma = rec709_luma(rgb);
        let delta = if luma > TONE_SPLIT {
            bright_delta
        } else if luma < TONE_SPLIT {
            dark_delta
        } else {
            0.0
        };
        if delta != 0.0 {
            for channel in rgb.iter_mut() {
                *channel += delta;
            }
        }

        if let Some(factor) = clarity_factor {
            for channel in rgb.iter_mut() {
                *channel = (*channel - MIDPOINT) * factor + MIDPOINT;
            }
        }

        rgb[0] *= warmth;
        rgb[2] *= 2.0 - warmth;

        dst[0] = clamp_u8(rgb[0]);
        dst[1] = clamp_u8(rgb[1]);
        dst[2] = clamp_u8(rgb[2]);
    }

    if let Some(saturation) = adjustments
        .saturation
        .filter(|v| (v - 1.0).abs() > f32::EPSILON)
    {
        apply_saturation_in_place(&mut out, saturation);
    }
    out
}

fn tone_delta(value: Option<f32>, scale: f32) -> f32 {
    value.map_or(0.0, |v| (v / 100.0) * scale)
}

fn rec709_luma(rgb: [f32; 3]) -> f32 {
    (0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]) / 255.0
}

fn apply_saturation_in_place(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let r = f32::from(pixel[0]);
        let g = f32::from(pixel[1]);
        let b = f32::from(pixel[2]);
        let gray = 0.299 * r + 0.587 * g + 0.114 * b;
        pixel[0] = clamp_u8(gray + (r - gray) * factor);
        pixel[1] = clamp_u8(gray + (g - gray) * factor);
        pixel[2] = clamp_u8(gray + (b - gray) * factor);
    }
}

fn clamp_u8(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 255.0).round() as u8
}
