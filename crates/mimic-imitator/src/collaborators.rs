//! Contracts of the networks and sinks the imitation pipeline drives.
//!
//! Pose recovery, segmentation and identity scoring are supplied by the
//! caller; the generator and background network may be the compact
//! reference networks in [`crate::nets`] or any other implementation.

use std::path::Path;

use candle_core::{Tensor, Var};
use mimic_core::{BodyDetails, BodyParameters, Result};

/// Image → body parameters, and parameters → mesh and joints
pub trait PoseRecovery {
    /// Estimate parameters from a normalized image [1, 3, S, S] in [-1, 1]
    fn estimate(&self, image: &Tensor) -> Result<BodyParameters>;

    /// Mesh vertices and joints for a parameter set
    fn details(&self, params: &BodyParameters) -> Result<BodyDetails>;
}

/// Person segmentation result
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Person bounding box (x0, y0, x1, y1) in pixels
    pub bbox: [f32; 4],
    /// Body mask [1, 1, H, W], 1 on the person
    pub body_mask: Tensor,
}

pub trait Segmenter {
    /// Segment the person in an image [3, H, W] in [-1, 1]
    fn segment(&self, image: &Tensor) -> Result<Segmentation>;
}

/// Source appearance encoded once per session
#[derive(Debug, Clone)]
pub struct SourceFeatures {
    /// Intermediate encoder activations
    pub encoder_outs: Vec<Tensor>,
    /// Deepest source features, warped into the target layout at synthesis
    pub resnet_outs: Tensor,
}

impl SourceFeatures {
    pub fn detach(&self) -> Self {
        Self {
            encoder_outs: self.encoder_outs.iter().map(Tensor::detach).collect(),
            resnet_outs: self.resnet_outs.detach(),
        }
    }
}

/// Training-mode generator outputs for the background, source and transfer
/// branches
#[derive(Debug, Clone)]
pub struct GeneratorOutputs {
    pub bg: Tensor,
    pub src_color: Tensor,
    pub src_mask: Tensor,
    pub tsf_color: Tensor,
    pub tsf_mask: Tensor,
}

/// Background inpainting network.
///
/// Inputs are 4-channel: an incomplete image followed by the hole mask
/// (1 where the background is unknown).
pub trait BackgroundNet {
    /// Raw network output [N, 3, H, W]
    fn forward(&self, inputs: &Tensor) -> Result<Tensor>;

    /// Fill the region under `body_mask` [N, 1, H, W]; visible pixels are kept
    fn inpaint(&self, image: &Tensor, body_mask: &Tensor) -> Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// Appearance-flow generator.
///
/// Opacity masks follow the background convention: 1 where the output
/// shows the background estimate, 0 where it shows synthesized color.
pub trait Generator {
    /// Encode source inputs [N, 3 + C, H, W]
    fn encode_src(&self, src_inputs: &Tensor) -> Result<SourceFeatures>;

    /// Synthesize (color, opacity) for transfer inputs [N, 3 + C, H, W]
    /// and warp field [N, H, W, 2]
    fn inference(&self, feats: &SourceFeatures, tsf_inputs: &Tensor, warp: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Run all three branches
    fn forward(
        &self,
        bg_inputs: &Tensor,
        src_inputs: &Tensor,
        tsf_inputs: &Tensor,
        warp: &Tensor,
    ) -> Result<GeneratorOutputs>;

    /// The generator's own background branch
    fn bg_model(&self) -> &dyn BackgroundNet;

    fn bg_model_mut(&mut self) -> &mut dyn BackgroundNet;

    /// Every trainable parameter, background branch included
    fn trainable_vars(&self) -> Vec<Var>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// Identity/perceptual criterion pooled around 2D joints
pub trait IdentityCriterion {
    fn loss(&self, a: &Tensor, b: &Tensor, kps_a: &Tensor, kps_b: &Tensor) -> Result<Tensor>;
}

/// Named image display
pub trait Visualizer {
    fn show(&self, name: &str, image: &Tensor) -> Result<()>;
}

/// Forward named images to an optional visualizer
pub fn visualize(visualizer: Option<&dyn Visualizer>, images: &[(&str, &Tensor)]) -> Result<()> {
    if let Some(vis) = visualizer {
        for (name, image) in images {
            vis.show(name, image)?;
        }
    }
    Ok(())
}

/// Destination for predicted frames
pub trait FrameSink {
    /// Persist an image tensor ([1, 3, H, W] or [3, H, W], range [-1, 1])
    fn save(&mut self, frame: &Tensor, path: &Path) -> Result<()>;
}
