//! Image loading, normalization and persistence.
//!
//! Tensors hold RGB in [-1, 1], channel-first.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use mimic_core::{Error, Result};

use crate::collaborators::FrameSink;

/// Image given by path or as decoded pixels
#[derive(Debug, Clone)]
pub enum ImageInput {
    Path(PathBuf),
    Pixels(RgbImage),
}

impl ImageInput {
    pub fn load(self) -> Result<RgbImage> {
        match self {
            ImageInput::Path(path) => load_image(&path),
            ImageInput::Pixels(pixels) => Ok(pixels),
        }
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        ImageInput::Path(path)
    }
}

impl From<&Path> for ImageInput {
    fn from(path: &Path) -> Self {
        ImageInput::Path(path.to_path_buf())
    }
}

impl From<RgbImage> for ImageInput {
    fn from(pixels: RgbImage) -> Self {
        ImageInput::Pixels(pixels)
    }
}

pub fn load_image(path: &Path) -> Result<RgbImage> {
    let decoded = image::open(path)
        .map_err(|e| Error::Image(format!("{}: {e}", path.display())))?;
    Ok(decoded.to_rgb8())
}

/// Square resize, skipped when the image already has the size
pub fn resize(image: &RgbImage, size: usize) -> RgbImage {
    let size = size as u32;
    if image.dimensions() == (size, size) {
        image.clone()
    } else {
        imageops::resize(image, size, size, FilterType::Triangle)
    }
}

/// Resize to `size` x `size` and normalize to a [1, 3, size, size] tensor
/// in [-1, 1]
pub fn to_tensor(image: &RgbImage, size: usize, device: &Device) -> Result<Tensor> {
    let resized = resize(image, size);
    let pixels = Tensor::from_vec(resized.into_raw(), (size, size, 3), device)?;
    let normalized = pixels
        .to_dtype(DType::F32)?
        .permute((2, 0, 1))?
        .affine(2.0 / 255.0, -1.0)?;
    Ok(normalized.unsqueeze(0)?)
}

/// Denormalize a [1, 3, H, W] or [3, H, W] tensor to 8-bit RGB
pub fn to_image(frame: &Tensor) -> Result<RgbImage> {
    let frame = match frame.rank() {
        4 => frame.get(0)?,
        3 => frame.clone(),
        _ => {
            return Err(Error::ShapeMismatch {
                what: "image tensor",
                expected: "[1, 3, H, W] or [3, H, W]".to_string(),
                actual: format!("{:?}", frame.dims()),
            })
        }
    };
    let (_, h, w) = frame.dims3()?;
    let bytes = frame
        .to_dtype(DType::F32)?
        .clamp(-1f32, 1f32)?
        .affine(127.5, 128.0)?
        .floor()?
        .clamp(0f32, 255f32)?
        .permute((1, 2, 0))?
        .to_dtype(DType::U8)?
        .flatten_all()?
        .to_vec1::<u8>()?;
    RgbImage::from_raw(w as u32, h as u32, bytes)
        .ok_or_else(|| Error::Image("pixel buffer does not match dimensions".to_string()))
}

pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(path)
        .map_err(|e| Error::Image(format!("{}: {e}", path.display())))
}

pub fn save_tensor(frame: &Tensor, path: &Path) -> Result<()> {
    save_image(&to_image(frame)?, path)
}

/// Writes frames as image files, format chosen by extension
#[derive(Debug, Default)]
pub struct ImageFileSink {
    written: usize,
}

impl ImageFileSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameSink for ImageFileSink {
    fn save(&mut self, frame: &Tensor, path: &Path) -> Result<()> {
        save_tensor(frame, path)?;
        self.written += 1;
        tracing::debug!("Saved {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 200]))
    }

    #[test]
    fn test_normalization_range() -> Result<()> {
        let t = to_tensor(&gradient(8), 8, &Device::Cpu)?;
        assert_eq!(t.dims(), &[1, 3, 8, 8]);
        let min = t.min_all()?.to_scalar::<f32>()?;
        let max = t.max_all()?.to_scalar::<f32>()?;
        assert!(min >= -1.0 && max <= 1.0);
        // red channel of pixel (0, 0) is 0 -> -1
        assert_eq!(t.get(0)?.get(0)?.get(0)?.get(0)?.to_scalar::<f32>()?, -1.0);
        Ok(())
    }

    #[test]
    fn test_pixels_survive_conversion() -> Result<()> {
        let image = gradient(8);
        let back = to_image(&to_tensor(&image, 8, &Device::Cpu)?)?;
        assert_eq!(back, image);
        Ok(())
    }

    #[test]
    fn test_resize_to_working_size() -> Result<()> {
        let t = to_tensor(&gradient(12), 6, &Device::Cpu)?;
        assert_eq!(t.dims(), &[1, 3, 6, 6]);
        Ok(())
    }

    #[test]
    fn test_file_sink_writes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("frame.png");
        let mut sink = ImageFileSink::new();
        let frame = to_tensor(&gradient(8), 8, &Device::Cpu)?;
        sink.save(&frame, &path)?;
        assert_eq!(sink.written(), 1);
        assert_eq!(load_image(&path)?, gradient(8));
        Ok(())
    }

    #[test]
    fn test_missing_file_is_image_error() {
        let err = load_image(Path::new("/nonexistent/mimic/source.png")).unwrap_err();
        assert!(matches!(err, Error::Image(_)));
    }
}
