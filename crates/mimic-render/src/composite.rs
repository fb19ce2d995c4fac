//! Pixel compositing.

use candle_core::Tensor;
use mimic_core::Result;

/// Blend by opacity: `mask * background + (1 - mask) * color`.
///
/// `mask` [N, 1, H, W] broadcasts over the color channels.
pub fn composite(mask: &Tensor, background: &Tensor, color: &Tensor) -> Result<Tensor> {
    let keep = mask.affine(-1.0, 1.0)?;
    Ok((mask.broadcast_mul(background)? + keep.broadcast_mul(color)?)?)
}

/// Frontal identity correction.
///
/// Inside the frontal region the prediction is replaced by the directly
/// warped source appearance, weighted by the generator's foreground
/// opacity: `(1 - front) * preds + warped * front * (1 - gen_mask)`.
pub fn front_blend(preds: &Tensor, warped: &Tensor, front_mask: &Tensor, gen_mask: &Tensor) -> Result<Tensor> {
    let outside = front_mask.affine(-1.0, 1.0)?;
    let fill = front_mask.broadcast_mul(&gen_mask.affine(-1.0, 1.0)?)?;
    Ok((outside.broadcast_mul(preds)? + warped.broadcast_mul(&fill)?)?)
}
