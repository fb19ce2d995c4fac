//! Reconstruction, mask and smoothness losses.

use candle_core::Tensor;
use mimic_core::Result;

const BCE_EPS: f64 = 1e-7;

/// Mean absolute error
pub fn l1(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok((pred - target)?.abs()?.mean_all()?)
}

/// Mean squared error
pub fn mse(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::loss::mse(pred, target)?)
}

/// Binary cross-entropy on probabilities, clamped away from 0 and 1
pub fn bce(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let p = pred.clamp(BCE_EPS, 1.0 - BCE_EPS)?;
    let pos = (target * p.log()?)?;
    let neg = (target.affine(-1.0, 1.0)? * p.affine(-1.0, 1.0)?.log()?)?;
    Ok((pos + neg)?.neg()?.mean_all()?)
}

/// Anisotropic L1 total variation of an image batch [N, C, H, W]
pub fn total_variation(img: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = img.dims4()?;
    let dx = (img.narrow(3, 0, w - 1)? - img.narrow(3, 1, w - 1)?)?;
    let dy = (img.narrow(2, 0, h - 1)? - img.narrow(2, 1, h - 1)?)?;
    Ok((dx.abs()?.mean_all()? + dy.abs()?.mean_all()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_l1() -> Result<()> {
        let a = Tensor::new(&[0.0f32, 1.0, -1.0, 2.0], &Device::Cpu)?;
        let b = Tensor::new(&[1.0f32, 1.0, 1.0, 1.0], &Device::Cpu)?;
        assert!((scalar(&l1(&a, &b)?) - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_bce_known_values() -> Result<()> {
        let pred = Tensor::new(&[0.5f32, 0.5], &Device::Cpu)?;
        let target = Tensor::new(&[1.0f32, 0.0], &Device::Cpu)?;
        assert!((scalar(&bce(&pred, &target)?) - std::f32::consts::LN_2).abs() < 1e-5);

        // saturated predictions stay finite
        let pred = Tensor::new(&[0.0f32, 1.0], &Device::Cpu)?;
        let loss = scalar(&bce(&pred, &target)?);
        assert!(loss.is_finite());
        assert!(loss > 10.0);
        Ok(())
    }

    #[test]
    fn test_total_variation() -> Result<()> {
        let flat = Tensor::ones((1, 3, 4, 4), candle_core::DType::F32, &Device::Cpu)?;
        assert_eq!(scalar(&total_variation(&flat)?), 0.0);

        // vertical stripes: horizontal differences of 1 everywhere
        let stripes = Tensor::new(&[[[[0f32, 1.0, 0.0, 1.0]; 2]]], &Device::Cpu)?;
        assert!((scalar(&total_variation(&stripes)?) - 1.0).abs() < 1e-6);
        Ok(())
    }
}
