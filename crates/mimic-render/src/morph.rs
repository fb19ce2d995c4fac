//! Binary morphology on masks.

use candle_core::Tensor;
use mimic_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphMode {
    Erode,
    Dilate,
}

/// Erode or dilate a binary mask [N, 1, H, W] with a `ks` x `ks` square
/// kernel. For erosion pixels beyond the border count as set, so it never
/// eats in from the image edge; for dilation they count as unset.
pub fn morph(mask: &Tensor, ks: usize, mode: MorphMode) -> Result<Tensor> {
    if ks == 0 || ks % 2 == 0 {
        return Err(Error::InvalidInput(format!(
            "morphology kernel size must be odd, got {ks}"
        )));
    }
    let (_, channels, _, _) = mask.dims4()?;
    if channels != 1 {
        return Err(Error::ShapeMismatch {
            what: "morphology mask",
            expected: "[N, 1, H, W]".to_string(),
            actual: format!("{:?}", mask.dims()),
        });
    }

    let pad = ks / 2;
    let padded = match mode {
        // pad with ones: 1 - pad_zeros(1 - mask)
        MorphMode::Erode => mask
            .affine(-1.0, 1.0)?
            .pad_with_zeros(2, pad, pad)?
            .pad_with_zeros(3, pad, pad)?
            .affine(-1.0, 1.0)?,
        MorphMode::Dilate => mask.pad_with_zeros(2, pad, pad)?.pad_with_zeros(3, pad, pad)?,
    };

    let kernel = Tensor::ones((1, 1, ks, ks), mask.dtype(), mask.device())?;
    let counts = padded.conv2d(&kernel, 0, 1, 1, 1)?;

    let threshold = match mode {
        MorphMode::Erode => (ks * ks) as f64 - 0.5,
        MorphMode::Dilate => 0.5,
    };
    let threshold = (counts.ones_like()? * threshold)?;
    Ok(counts.ge(&threshold)?.to_dtype(mask.dtype())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn square(size: usize, lo: usize, hi: usize) -> Result<Tensor> {
        let mut data = vec![0f32; size * size];
        for i in lo..hi {
            for j in lo..hi {
                data[i * size + j] = 1.0;
            }
        }
        Ok(Tensor::from_vec(data, (1, 1, size, size), &Device::Cpu)?)
    }

    fn count(t: &Tensor) -> Result<f32> {
        Ok(t.sum_all()?.to_scalar::<f32>()?)
    }

    #[test]
    fn test_erode_shrinks() -> Result<()> {
        let mask = square(9, 2, 7)?;
        let eroded = morph(&mask, 3, MorphMode::Erode)?;
        assert_eq!(eroded.dims(), mask.dims());
        assert_eq!(count(&eroded)?, 9.0);
        Ok(())
    }

    #[test]
    fn test_dilate_grows() -> Result<()> {
        let mask = square(9, 3, 6)?;
        let dilated = morph(&mask, 3, MorphMode::Dilate)?;
        assert_eq!(count(&dilated)?, 25.0);
        Ok(())
    }

    #[test]
    fn test_dilate_empty_stays_empty() -> Result<()> {
        let empty = Tensor::zeros((1, 1, 9, 9), candle_core::DType::F32, &Device::Cpu)?;
        let dilated = morph(&empty, 3, MorphMode::Dilate)?;
        assert_eq!(count(&dilated)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_dilate_at_border() -> Result<()> {
        // 2x2 block in the corner grows to 3x3
        let mask = square(9, 0, 2)?;
        let dilated = morph(&mask, 3, MorphMode::Dilate)?;
        assert_eq!(count(&dilated)?, 9.0);
        Ok(())
    }

    #[test]
    fn test_border_counts_as_set() -> Result<()> {
        let full = Tensor::ones((1, 1, 5, 5), candle_core::DType::F32, &Device::Cpu)?;
        let eroded = morph(&full, 5, MorphMode::Erode)?;
        assert_eq!(count(&eroded)?, 25.0);
        Ok(())
    }

    #[test]
    fn test_even_kernel_rejected() -> Result<()> {
        let mask = square(4, 1, 3)?;
        assert!(morph(&mask, 2, MorphMode::Erode).is_err());
        Ok(())
    }
}
