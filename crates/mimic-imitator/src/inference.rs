//! Inference loop over a target sequence.

use std::path::PathBuf;

use candle_core::Tensor;
use mimic_core::{CamStrategy, Error, Result};

use crate::collaborators::{FrameSink, Visualizer};
use crate::imaging::to_tensor;
use crate::imitator::Imitator;
use crate::session::Session;
use crate::transfer::TargetPose;

/// Where predicted frames are written
pub struct FrameOutput<'a> {
    pub dir: PathBuf,
    pub sink: &'a mut dyn FrameSink,
}

impl<'a> FrameOutput<'a> {
    pub fn new(dir: impl Into<PathBuf>, sink: &'a mut dyn FrameSink) -> Self {
        Self {
            dir: dir.into(),
            sink,
        }
    }
}

impl Imitator {
    /// Imitate a target sequence with the session's source.
    ///
    /// Frames are independent of each other apart from the camera anchor.
    /// Image targets are saved as `pred_<file>` with the resized target as
    /// `gt_<file>`; parameter targets as `pred_<t:08>.jpg`. The first
    /// failing frame aborts the sequence.
    ///
    /// # Returns
    /// Predicted frames [3, S, S] in target order
    pub fn inference(
        &self,
        session: &mut Session,
        targets: &[TargetPose],
        strategy: CamStrategy,
        mut output: Option<FrameOutput<'_>>,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<Vec<Tensor>> {
        session.reset_sequence();

        let length = targets.len();
        let mut outputs = Vec::with_capacity(length);

        for (t, target) in targets.iter().enumerate() {
            let tsf_inputs = self.transfer_params(session, target, strategy, t)?;
            let preds = self.forward(session, &tsf_inputs)?;

            let gt = match &session.transfer()?.image {
                Some(image) => Some(to_tensor(image, self.config.image_size, &self.device)?),
                None => None,
            };

            if let Some(vis) = visualizer {
                vis.show(&format!("pred_{strategy}"), &preds)?;
                if let Some(gt) = &gt {
                    vis.show("gt", gt)?;
                }
            }

            if let Some(out) = output.as_mut() {
                match target {
                    TargetPose::Image { path, .. } => {
                        let filename = path
                            .file_name()
                            .ok_or_else(|| Error::InvalidInput(format!("no file name in {}", path.display())))?
                            .to_string_lossy();
                        out.sink.save(&preds, &out.dir.join(format!("pred_{filename}")))?;
                        if let Some(gt) = &gt {
                            out.sink.save(gt, &out.dir.join(format!("gt_{filename}")))?;
                        }
                    }
                    TargetPose::Params(_) => {
                        out.sink.save(&preds, &out.dir.join(format!("pred_{t:08}.jpg")))?;
                    }
                }
            }

            outputs.push(preds.squeeze(0)?);
            tracing::info!("{} / {}", t, length);
        }

        Ok(outputs)
    }
}
