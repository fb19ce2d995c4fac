//! Camera/pose swap.
//!
//! The synthetic body always takes its pose from the target and its shape
//! from the source; only the camera depends on the selected strategy.

use crate::error::{Error, Result};
use crate::types::{BodyParameters, CamStrategy, Camera};

/// Combine the source identity with a target pose.
///
/// # Arguments
/// * `src_cam` - Camera recovered from the source image
/// * `src_shape` - Source shape coefficients
/// * `target` - Target frame parameters
/// * `strategy` - Camera selection strategy
/// * `anchor` - Target camera of the first frame; required by `Smooth`
pub fn swap_params(
    src_cam: &Camera,
    src_shape: &[f32],
    target: &BodyParameters,
    strategy: CamStrategy,
    anchor: Option<&Camera>,
) -> Result<BodyParameters> {
    let cam = match strategy {
        CamStrategy::Smooth => {
            let first = anchor.ok_or(Error::MissingAnchor)?;
            smooth_camera(src_cam, &target.cam, first)
        }
        CamStrategy::Source => *src_cam,
        CamStrategy::Target => target.cam,
    };

    BodyParameters::new(cam, target.pose.clone(), src_shape.to_vec())
}

/// Source camera shifted by the target's translation since the first frame.
/// The scale stays that of the source.
pub fn smooth_camera(src_cam: &Camera, tgt_cam: &Camera, first_cam: &Camera) -> Camera {
    Camera {
        scale: src_cam.scale,
        tx: src_cam.tx + (tgt_cam.tx - first_cam.tx),
        ty: src_cam.ty + (tgt_cam.ty - first_cam.ty),
    }
}
