//! Grayscale decode, resize, normalization, and channel assembly.

use crate::aug::AugmentPipeline;
use crate::types::{DatasetError, DatasetResult};
use image::imageops::{self, FilterType};
use std::path::Path;

/// A single-channel image as row-major f32 in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct GrayBuffer {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Decodes `path` to grayscale, resizes to `shape` (width, height) with
/// bilinear filtering, and normalizes to [0, 1].
pub fn load_gray(path: &Path, shape: (u32, u32)) -> DatasetResult<GrayBuffer> {
    if !path.exists() {
        return Err(DatasetError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let decoded = image::open(path).map_err(|source| DatasetError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let gray = decoded.to_luma8();
    let (width, height) = shape;
    let resized = if gray.dimensions() == (width, height) {
        gray
    } else {
        imageops::resize(&gray, width, height, FilterType::Triangle)
    };
    let data = resized.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
    Ok(GrayBuffer {
        data,
        width,
        height,
    })
}

/// Loads and assembles one model input as a CHW buffer: image channel
/// first, mask channel second, each present only when its path is.
/// Requesting neither is a validation error.
pub fn assemble_input(
    image_path: Option<&Path>,
    mask_path: Option<&Path>,
    shape: (u32, u32),
    augment: Option<(&AugmentPipeline, u64)>,
) -> DatasetResult<Vec<f32>> {
    if image_path.is_none() && mask_path.is_none() {
        return Err(DatasetError::Validation(
            "no input source: need an image path, a mask path, or both".into(),
        ));
    }
    let mut image = match image_path {
        Some(path) => Some(load_gray(path, shape)?),
        None => None,
    };
    let mut mask = match mask_path {
        Some(path) => Some(load_gray(path, shape)?),
        None => None,
    };
    if let Some((pipeline, sample_key)) = augment {
        pipeline.apply(sample_key, image.as_mut(), mask.as_mut());
    }

    let plane = (shape.0 * shape.1) as usize;
    let channels = image.is_some() as usize + mask.is_some() as usize;
    let mut out = Vec::with_capacity(plane * channels);
    if let Some(image) = image {
        out.extend_from_slice(&image.data);
    }
    if let Some(mask) = mask {
        out.extend_from_slice(&mask.data);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_png(path: &Path, width: u32, height: u32, value: u8) {
        let mut img = GrayImage::new(width, height);
        for p in img.pixels_mut() {
            *p = Luma([value]);
        }
        img.save(path).unwrap();
    }

    #[test]
    fn decode_normalizes_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 8, 8, 255);
        let buf = load_gray(&path, (8, 8)).unwrap();
        assert_eq!(buf.data.len(), 64);
        assert!(buf.data.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn decode_resizes_to_requested_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 32, 16, 128);
        let buf = load_gray(&path, (8, 8)).unwrap();
        assert_eq!((buf.width, buf.height), (8, 8));
        assert_eq!(buf.data.len(), 64);
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = load_gray(Path::new("/nonexistent/scan.png"), (8, 8)).unwrap_err();
        assert!(matches!(err, DatasetError::MissingInput { .. }));
    }

    #[test]
    fn both_channels_stack_image_first() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("img.png");
        let mask = dir.path().join("mask.png");
        write_png(&img, 4, 4, 255);
        write_png(&mask, 4, 4, 0);
        let input = assemble_input(Some(&img), Some(&mask), (4, 4), None).unwrap();
        assert_eq!(input.len(), 32);
        assert!(input[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(input[16..].iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn single_channel_from_either_source() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("img.png");
        write_png(&img, 4, 4, 100);
        let from_image = assemble_input(Some(&img), None, (4, 4), None).unwrap();
        let from_mask = assemble_input(None, Some(&img), (4, 4), None).unwrap();
        assert_eq!(from_image.len(), 16);
        assert_eq!(from_image, from_mask);
    }

    #[test]
    fn neither_source_is_a_validation_error() {
        let err = assemble_input(None, None, (4, 4), None).unwrap_err();
        assert!(matches!(err, DatasetError::Validation(_)));
    }
}
