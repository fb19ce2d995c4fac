//! Transfer engine: re-pose the source into one target frame.

use std::path::PathBuf;

use candle_core::Tensor;
use mimic_core::{swap_params, BodyParameters, CamStrategy, Result};
use mimic_render::{composite, front_blend, grid_sample, CorrespondenceMaps, FaceRegion};

use crate::imaging::load_image;
use crate::imitator::Imitator;
use crate::session::{Session, TransferInfo};

/// Where a target pose comes from
#[derive(Debug, Clone)]
pub enum TargetPose {
    /// Target image; parameters are estimated from it unless given
    Image {
        path: PathBuf,
        params: Option<BodyParameters>,
    },
    /// Known parameters, no image
    Params(BodyParameters),
}

impl TargetPose {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        TargetPose::Image {
            path: path.into(),
            params: None,
        }
    }
}

impl From<BodyParameters> for TargetPose {
    fn from(params: BodyParameters) -> Self {
        TargetPose::Params(params)
    }
}

impl Imitator {
    /// Prepare the generator inputs for frame `t` of a sequence.
    ///
    /// Stores the new [`TransferInfo`] in the session, replacing the
    /// previous one. Under `Smooth`, frame 0 sets the camera anchor.
    ///
    /// # Returns
    /// Warped source image concatenated with the target condition
    /// [1, 3 + C, S, S]
    pub fn transfer_params(
        &self,
        session: &mut Session,
        target: &TargetPose,
        strategy: CamStrategy,
        t: usize,
    ) -> Result<Tensor> {
        let (params, image) = match target {
            TargetPose::Image { path, params } => {
                let image = load_image(path)?;
                let params = match params {
                    Some(params) => params.clone(),
                    None => self.estimate_params(&image)?,
                };
                (params, Some(image))
            }
            TargetPose::Params(params) => (params.clone(), None),
        };

        if t == 0 && strategy == CamStrategy::Smooth {
            session.set_first_cam(params.cam);
        }

        let source = session.source();
        let tsf_params = swap_params(
            source.details.cam(),
            &source.details.params.shape,
            &params,
            strategy,
            session.first_cam(),
        )?;
        let details = self.hmr.details(&tsf_params)?;
        let maps = CorrespondenceMaps::compute(self.render.as_ref(), &details.cam_tensor()?, &details.verts, false)?;

        let warp = self.render.warp_field(&source.maps.p2verts, &maps.fim, &maps.wim)?;
        let tsf_img = grid_sample(&source.img, &warp)?;
        let tsf_inputs = Tensor::cat(&[&tsf_img, &maps.cond], 1)?;

        tracing::debug!(t, strategy = %strategy, cam = ?tsf_params.cam, "Transfer parameters");

        session.set_transfer(TransferInfo {
            details,
            maps,
            tsf_img,
            warp,
            image,
        });
        Ok(tsf_inputs)
    }

    /// Synthesize the frame for the session's latest transfer.
    ///
    /// `mask * background + (1 - mask) * color`, then the frontal
    /// correction when `front_warp` is enabled.
    pub fn forward(&self, session: &Session, tsf_inputs: &Tensor) -> Result<Tensor> {
        let source = session.source();
        let transfer = session.transfer()?;

        let (color, mask) = self.generator.inference(&source.feats, tsf_inputs, &transfer.warp)?;
        let preds = composite(&mask, &source.bg, &color)?;

        let preds = if self.config.front_warp {
            let front = self.render.front_mask(&transfer.maps.fim, FaceRegion::FrontalFace)?;
            front_blend(&preds, &transfer.tsf_img, &front, &mask)?
        } else {
            preds
        };
        Ok(preds.detach())
    }
}
