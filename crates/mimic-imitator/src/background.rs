//! Test-time background refinement.
//!
//! The background network is fitted to the visible background of a single
//! source image. Its input is a fixed noise tensor; only the weights move.
//! The reconstruction term covers visible pixels only, and an L1
//! total-variation term keeps the filled holes smooth.

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use mimic_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::collaborators::{visualize, BackgroundNet, Visualizer};
use crate::losses::{mse, total_variation};

/// Distribution of the fixed network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseKind {
    /// U(0, 1)
    Uniform,
    /// N(0, 1)
    #[default]
    Normal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundRefineConfig {
    pub lr: f64,
    pub num_iters: usize,
    /// Weight of the total-variation term
    pub tv_weight: f64,
    /// Record losses every this many iterations
    pub log_every: usize,
    pub noise: NoiseKind,
    /// Noise is multiplied by this factor
    pub noise_scale: f64,
}

impl Default for BackgroundRefineConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            num_iters: 10_000,
            tv_weight: 1e-3,
            log_every: 10,
            noise: NoiseKind::Normal,
            noise_scale: 0.1,
        }
    }
}

/// Noise tensor [1, channels, h, w]
pub fn noise_input(
    channels: usize,
    h: usize,
    w: usize,
    kind: NoiseKind,
    scale: f64,
    device: &Device,
) -> Result<Tensor> {
    let noise = match kind {
        NoiseKind::Uniform => Tensor::rand(0f32, 1.0, (1, channels, h, w), device)?,
        NoiseKind::Normal => Tensor::randn(0f32, 1.0, (1, channels, h, w), device)?,
    };
    Ok(noise.affine(scale, 0.0)?)
}

/// Loss terms of one refinement step
pub struct BackgroundLosses {
    pub total: Tensor,
    pub mse: Tensor,
    pub tv: Tensor,
}

impl BackgroundLosses {
    /// # Arguments
    /// * `out` - Network output [1, 3, H, W]
    /// * `incomplete` - Image with holes zeroed [1, 3, H, W]
    /// * `visible` - 1 on known background [1, 1, H, W]
    /// * `tv_weight` - Total-variation weight
    pub fn compute(out: &Tensor, incomplete: &Tensor, visible: &Tensor, tv_weight: f64) -> Result<Self> {
        let mse = mse(&out.broadcast_mul(visible)?, incomplete)?;
        let tv = total_variation(out)?;
        let total = (&mse + tv.affine(tv_weight, 0.0)?)?;
        Ok(Self { total, mse, tv })
    }

    pub fn record(&self, step: usize) -> Result<BackgroundStep> {
        Ok(BackgroundStep {
            step,
            total: self.total.to_scalar::<f32>()?,
            mse: self.mse.to_scalar::<f32>()?,
            tv: self.tv.to_scalar::<f32>()?,
        })
    }
}

/// Logged losses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStep {
    pub step: usize,
    pub total: f32,
    pub mse: f32,
    pub tv: f32,
}

pub struct BackgroundRefinement {
    pub history: Vec<BackgroundStep>,
    /// Visible pixels kept, holes filled from the fitted network [1, 3, H, W]
    pub background: Tensor,
}

/// Fit `net` to the visible part of `bg_inputs` [1, 4, H, W] (incomplete
/// image followed by the hole mask).
///
/// Runs exactly `config.num_iters` steps. The network is back in
/// evaluation mode afterwards, also on error.
pub fn refine_background(
    net: &mut dyn BackgroundNet,
    bg_inputs: &Tensor,
    config: &BackgroundRefineConfig,
    visualizer: Option<&dyn Visualizer>,
) -> Result<BackgroundRefinement> {
    let (_, channels, h, w) = bg_inputs.dims4()?;
    if channels != 4 {
        return Err(Error::ShapeMismatch {
            what: "background inputs",
            expected: "[1, 4, H, W]".to_string(),
            actual: format!("{:?}", bg_inputs.dims()),
        });
    }

    let incomplete = bg_inputs.narrow(1, 0, 3)?.detach();
    let hole = bg_inputs.narrow(1, 3, 1)?.detach();
    let visible = hole.affine(-1.0, 1.0)?;
    let inputs = noise_input(channels, h, w, config.noise, config.noise_scale, bg_inputs.device())?;

    net.set_training(true);
    let history = fit(net, &inputs, &incomplete, &visible, config, visualizer);
    net.set_training(false);
    let history = history?;

    let out = net.forward(&inputs)?.detach();
    let background = (&incomplete + out.broadcast_mul(&hole)?)?;

    Ok(BackgroundRefinement { history, background })
}

fn fit(
    net: &mut dyn BackgroundNet,
    inputs: &Tensor,
    incomplete: &Tensor,
    visible: &Tensor,
    config: &BackgroundRefineConfig,
    visualizer: Option<&dyn Visualizer>,
) -> Result<Vec<BackgroundStep>> {
    let params = ParamsAdamW {
        lr: config.lr,
        beta1: 0.5,
        beta2: 0.999,
        eps: 1e-8,
        weight_decay: 0.0,
    };
    let mut optimizer = AdamW::new(net.trainable_vars(), params)?;
    let log_every = config.log_every.max(1);
    let mut history = Vec::new();

    for step in 0..config.num_iters {
        let out = net.forward(inputs)?;
        let losses = BackgroundLosses::compute(&out, incomplete, visible, config.tv_weight)?;
        optimizer.backward_step(&losses.total)?;

        if step % log_every == 0 {
            let record = losses.record(step)?;
            tracing::info!(
                "step = {}, total = {:.6}, mse_loss = {:.6}, tv_loss = {:.6}",
                record.step,
                record.total,
                record.mse,
                record.tv
            );
            history.push(record);
            visualize(visualizer, &[("incomp_imgs", incomplete), ("comp_imgs", &out)])?;
        }
    }

    Ok(history)
}
