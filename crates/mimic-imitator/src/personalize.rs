//! Source personalization.

use std::path::Path;

use candle_core::Tensor;
use image::RgbImage;
use mimic_core::{BodyParameters, Error, Result};
use mimic_render::{morph, CorrespondenceMaps, MorphMode};

use crate::collaborators::{visualize, Visualizer};
use crate::imaging::{resize, save_image, to_tensor, ImageInput};
use crate::imitator::Imitator;
use crate::session::{Session, SourceInfo};

impl Imitator {
    /// Recover body parameters from an image at the pose-recovery resolution
    pub fn estimate_params(&self, image: &RgbImage) -> Result<BodyParameters> {
        let input = to_tensor(image, self.config.hmr_image_size, &self.device)?;
        self.hmr.estimate(&input)
    }

    /// Build a session for a source image.
    ///
    /// # Arguments
    /// * `source` - Source image, by path or decoded
    /// * `params` - Known body parameters; estimated from the image otherwise
    /// * `snapshot` - Where to save the resized source image
    /// * `visualizer` - Receives `src` and `bg`
    pub fn personalize(
        &self,
        source: impl Into<ImageInput>,
        params: Option<BodyParameters>,
        snapshot: Option<&Path>,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<Session> {
        let size = self.config.image_size;
        let image = source.into().load()?;
        let img = to_tensor(&image, size, &self.device)?;

        let params = match params {
            Some(params) => params,
            None => self.estimate_params(&image)?,
        };
        let details = self.hmr.details(&params)?;
        let maps = CorrespondenceMaps::compute(
            self.render.as_ref(),
            &details.cam_tensor()?,
            &details.verts,
            self.config.only_vis,
        )?;
        let coverage = maps.bg_channel()?;

        // Body and background masks
        let (body_mask, bg_mask) = match &self.detector {
            Some(detector) => {
                let segmentation = detector.segment(&img.get(0)?)?;
                let body_mask = segmentation.body_mask;
                if body_mask.dims() != [1, 1, size, size] {
                    return Err(Error::ShapeMismatch {
                        what: "segmenter body mask",
                        expected: format!("[1, 1, {size}, {size}]"),
                        actual: format!("{:?}", body_mask.dims()),
                    });
                }
                let bg_mask = body_mask.affine(-1.0, 1.0)?;
                (body_mask, bg_mask)
            }
            None => {
                let bg_mask = morph(&coverage, self.config.bg_ks, MorphMode::Erode)?;
                (bg_mask.affine(-1.0, 1.0)?, bg_mask)
            }
        };

        // Background estimate
        let incomplete = img.broadcast_mul(&bg_mask)?;
        let bg_inputs = Tensor::cat(&[&incomplete, &body_mask], 1)?;
        let bg = match &self.bgnet {
            Some(net) => net.inpaint(&img, &body_mask)?,
            None => {
                let filled = self.generator.bg_model().forward(&bg_inputs)?;
                (&incomplete + filled.broadcast_mul(&body_mask)?)?
            }
        }
        .detach();

        // Source features over a slightly dilated silhouette
        let ft_mask = morph(&coverage, self.config.ft_ks, MorphMode::Erode)?.affine(-1.0, 1.0)?;
        let src_inputs = Tensor::cat(&[&img.broadcast_mul(&ft_mask)?, &maps.cond], 1)?;
        let feats = self.generator.encode_src(&src_inputs)?.detach();

        visualize(visualizer, &[("src", &img), ("bg", &bg)])?;

        if let Some(path) = snapshot {
            save_image(&resize(&image, size), path)?;
        }

        tracing::info!(
            "Personalized source {}x{} (detector: {}, dedicated bgnet: {})",
            image.width(),
            image.height(),
            self.detector.is_some(),
            self.bgnet.is_some()
        );

        Ok(Session::new(SourceInfo {
            details,
            maps,
            img,
            image,
            bg,
            bg_inputs,
            body_mask,
            bg_mask,
            ft_mask,
            feats,
        }))
    }
}
