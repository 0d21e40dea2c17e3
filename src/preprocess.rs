//! Numeric preprocessing: raw pixel buffer to a model-ready tensor.
//!
//! The output layout is NHWC `[1, target_height, pad_left + scaled_width +
//! pad_right, target_channels]`; the inference invoker transposes to NCHW.
//! Steps, in order: channel collapse, aspect-preserving bilinear rescale to
//! the target height, `x/255` then `(x - mean)/std` normalization, constant
//! width padding, batch axis. Padding happens after normalization, so the
//! pad value is in normalized units.

use crate::error::{PredictError, Result};
use crate::types::ImageRegion;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb};
use ndarray::Array4;

/// Preprocessing parameters. Mean/std come from the training corpus and
/// travel with the model artifact.
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// 1 collapses to grayscale by channel averaging; 3 keeps RGB.
    pub target_channels: u32,
    /// Fill value for the width padding, in normalized units.
    pub pad_value: f32,
    pub pad_left: usize,
    pub pad_right: usize,
    pub mean: f32,
    pub std: f32,
    pub target_height: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_channels: 1,
            pad_value: 0.0,
            pad_left: 64,
            pad_right: 64,
            mean: 238.6531 / 255.0,
            std: 43.4356 / 255.0,
            target_height: 128,
        }
    }
}

/// Width after rescaling to `target_height` with the aspect ratio preserved.
pub fn scaled_width(target_height: usize, width: u32, height: u32) -> usize {
    (target_height as f64 * width as f64 / height as f64).round() as usize
}

/// Preprocesses a validated region into a `[1, H, W, C]` tensor.
pub fn preprocess_region(region: &ImageRegion, cfg: &PreprocessConfig) -> Result<Array4<f32>> {
    region.validate()?;
    preprocess(
        &region.pixels,
        region.width,
        region.height,
        region.channels,
        cfg,
    )
}

/// Preprocesses a raw interleaved pixel buffer into a `[1, H, W, C]` tensor.
pub fn preprocess(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    cfg: &PreprocessConfig,
) -> Result<Array4<f32>> {
    if width == 0 || height == 0 {
        return Err(PredictError::InputValidation(format!(
            "cannot preprocess a {width}x{height} image"
        )));
    }
    if pixels.len() != (width * height * channels) as usize {
        return Err(PredictError::InputValidation(format!(
            "pixel buffer length {} does not match {width}x{height}x{channels}",
            pixels.len()
        )));
    }

    let new_width = scaled_width(cfg.target_height, width, height);
    if new_width == 0 {
        return Err(PredictError::InputValidation(format!(
            "image {width}x{height} is too narrow to rescale to height {}",
            cfg.target_height
        )));
    }

    match cfg.target_channels {
        1 => preprocess_grayscale(pixels, width, height, channels, new_width, cfg),
        3 => preprocess_rgb(pixels, width, height, channels, new_width, cfg),
        other => Err(PredictError::InputValidation(format!(
            "unsupported target channel count: {other}"
        ))),
    }
}

/// Collapse to one channel by averaging color channels (alpha is ignored for
/// RGBA canvas crops, matching what the cropper's pixel source delivers).
fn preprocess_grayscale(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    new_width: usize,
    cfg: &PreprocessConfig,
) -> Result<Array4<f32>> {
    let color_channels = channels.min(3) as usize;
    let stride = channels as usize;
    let mut plane = Vec::with_capacity((width * height) as usize);
    for px in pixels.chunks_exact(stride) {
        let sum: f32 = px[..color_channels].iter().map(|&v| v as f32).sum();
        plane.push(sum / color_channels as f32);
    }

    let gray: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_raw(width, height, plane)
        .ok_or_else(|| PredictError::Internal("grayscale buffer construction failed".into()))?;

    // Triangle filter is bilinear interpolation.
    let resized = imageops::resize(
        &gray,
        new_width as u32,
        cfg.target_height as u32,
        FilterType::Triangle,
    );

    let out_width = cfg.pad_left + new_width + cfg.pad_right;
    let mut tensor =
        Array4::<f32>::from_elem((1, cfg.target_height, out_width, 1), cfg.pad_value);
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, y as usize, cfg.pad_left + x as usize, 0]] =
            normalize(pixel.0[0], cfg.mean, cfg.std);
    }
    Ok(tensor)
}

fn preprocess_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    new_width: usize,
    cfg: &PreprocessConfig,
) -> Result<Array4<f32>> {
    let stride = channels as usize;
    let mut plane = Vec::with_capacity((width * height) as usize * 3);
    for px in pixels.chunks_exact(stride) {
        match stride {
            1 => plane.extend_from_slice(&[px[0] as f32, px[0] as f32, px[0] as f32]),
            _ => plane.extend(px[..3].iter().map(|&v| v as f32)),
        }
    }

    let rgb: ImageBuffer<Rgb<f32>, Vec<f32>> = ImageBuffer::from_raw(width, height, plane)
        .ok_or_else(|| PredictError::Internal("rgb buffer construction failed".into()))?;

    let resized = imageops::resize(
        &rgb,
        new_width as u32,
        cfg.target_height as u32,
        FilterType::Triangle,
    );

    let out_width = cfg.pad_left + new_width + cfg.pad_right;
    let mut tensor =
        Array4::<f32>::from_elem((1, cfg.target_height, out_width, 3), cfg.pad_value);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, y as usize, cfg.pad_left + x as usize, c]] =
                normalize(pixel.0[c], cfg.mean, cfg.std);
        }
    }
    Ok(tensor)
}

#[inline]
fn normalize(value: f32, mean: f32, std: f32) -> f32 {
    (value / 255.0 - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PreprocessConfig {
        PreprocessConfig::default()
    }

    #[test]
    fn output_shape_follows_aspect_ratio() {
        // 200x50 rescaled to height 128 -> width round(128 * 200/50) = 512.
        let pixels = vec![255u8; 200 * 50 * 3];
        let tensor = preprocess(&pixels, 200, 50, 3, &cfg()).unwrap();
        assert_eq!(tensor.shape(), &[1, 128, 64 + 512 + 64, 1]);
    }

    #[test]
    fn scaled_width_rounds_to_nearest() {
        assert_eq!(scaled_width(128, 100, 100), 128);
        assert_eq!(scaled_width(128, 3, 7), 55); // 54.857.. rounds up
        assert_eq!(scaled_width(64, 1, 2), 32);
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(preprocess(&[], 0, 10, 1, &cfg()).is_err());
        assert!(preprocess(&[], 10, 0, 1, &cfg()).is_err());
    }

    #[test]
    fn buffer_length_mismatch_is_rejected() {
        let pixels = vec![0u8; 10];
        assert!(preprocess(&pixels, 5, 5, 3, &cfg()).is_err());
    }

    #[test]
    fn uniform_image_normalizes_to_constant() {
        // A constant-255 gray input must produce (1 - mean)/std everywhere
        // inside the unpadded window.
        let pixels = vec![255u8; 64 * 64];
        let c = cfg();
        let tensor = preprocess(&pixels, 64, 64, 1, &c).unwrap();
        let expected = (1.0 - c.mean) / c.std;
        let inner = tensor[[0, 0, c.pad_left, 0]];
        assert!((inner - expected).abs() < 1e-4, "{inner} vs {expected}");
    }

    #[test]
    fn padding_columns_hold_pad_value() {
        let pixels = vec![128u8; 32 * 32];
        let c = cfg();
        let tensor = preprocess(&pixels, 32, 32, 1, &c).unwrap();
        let last = tensor.shape()[2] - 1;
        assert_eq!(tensor[[0, 5, 0, 0]], c.pad_value);
        assert_eq!(tensor[[0, 5, last, 0]], c.pad_value);
    }

    #[test]
    fn rgba_alpha_is_ignored_in_grayscale_collapse() {
        // Same RGB content with wildly different alpha must preprocess
        // identically.
        let mut opaque = Vec::new();
        let mut transparent = Vec::new();
        for i in 0..(16 * 16) {
            let v = (i % 256) as u8;
            opaque.extend_from_slice(&[v, v, v, 255]);
            transparent.extend_from_slice(&[v, v, v, 0]);
        }
        let a = preprocess(&opaque, 16, 16, 4, &cfg()).unwrap();
        let b = preprocess(&transparent, 16, 16, 4, &cfg()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rgb_target_keeps_three_channels() {
        let pixels = vec![10u8; 20 * 20 * 3];
        let c = PreprocessConfig {
            target_channels: 3,
            ..cfg()
        };
        let tensor = preprocess(&pixels, 20, 20, 3, &c).unwrap();
        assert_eq!(tensor.shape()[3], 3);
    }
}
