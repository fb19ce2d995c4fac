//! Post-personalization: fine-tune the generator on the current source.
//!
//! Every batch runs the generator twice. The forward pass synthesizes the
//! source and a transfer; the cycle pass maps the synthesized transfer back
//! into the source pose. Losses:
//!
//! - cycle: synthesized source and cycled transfer against the source
//! - structure: transfer against the initial prediction, plus the transfer
//!   warped back to the source layout against the source body outside the
//!   back of the head
//! - identity: joint-pooled identity criterion in both directions
//! - mask: opacity against the rendered background coverage

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use mimic_core::Result;
use mimic_render::{composite, front_blend, grid_sample, FaceRegion, Renderer};
use serde::{Deserialize, Serialize};

use crate::collaborators::{visualize, Generator, IdentityCriterion, Visualizer};
use crate::imitator::Imitator;
use crate::losses::{bce, l1};
use crate::session::Session;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub cycle: f64,
    pub structure: f64,
    pub identity: f64,
    pub mask: f64,
    /// Weight of the masked term inside the structural loss
    pub masked_structure: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            cycle: 10.0,
            structure: 10.0,
            identity: 1.0,
            mask: 5.0,
            masked_structure: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostPersonalizeConfig {
    pub lr: f64,
    /// Learning rate after the last decay epoch
    pub final_lr: f64,
    pub nodecay_epochs: usize,
    /// Epochs of linear decay after the constant phase; 0 disables decay.
    /// The rate steps down once at the end of each of them.
    pub decay_epochs: usize,
    /// Visualize every this many steps
    pub log_every: usize,
    pub weights: LossWeights,
}

impl Default for PostPersonalizeConfig {
    fn default() -> Self {
        Self {
            lr: 2e-4,
            final_lr: 1e-5,
            nodecay_epochs: 5,
            decay_epochs: 0,
            log_every: 10,
            weights: LossWeights::default(),
        }
    }
}

impl PostPersonalizeConfig {
    pub fn epochs(&self) -> usize {
        self.nodecay_epochs + self.decay_epochs
    }

    /// Learning rate for the epoch after `epoch`, or `None` when it stays
    /// at `lr`
    pub fn next_lr(&self, epoch: usize, lr: f64) -> Option<f64> {
        if self.decay_epochs == 0 || epoch < self.nodecay_epochs {
            return None;
        }
        Some(linear_decay(lr, self.lr, self.final_lr, self.decay_epochs))
    }
}

/// One batch of paired source/target samples.
///
/// Inputs follow the imitator layout: RGB, then condition channels whose
/// last one is background coverage.
#[derive(Debug, Clone)]
pub struct CycleBatch {
    /// 2D joints of source and target [N, 2, J, 2]
    pub j2ds: Tensor,
    /// Source → target warp [N, H, W, 2]
    pub warp: Tensor,
    /// Target → source warp [N, H, W, 2]
    pub warp_cycle: Tensor,
    /// [N, 4, H, W]
    pub bg_inputs: Tensor,
    /// [N, 3 + C, H, W]
    pub src_inputs: Tensor,
    /// [N, 3 + C, H, W]
    pub tsf_inputs: Tensor,
    /// [N, H, W]
    pub src_fim: Tensor,
    /// [N, H, W]
    pub tsf_fim: Tensor,
    /// Initial transfer predictions [N, 3, H, W]
    pub init_preds: Tensor,
    /// Source and target frames [N, 2, 3, H, W]
    pub images: Tensor,
}

impl CycleBatch {
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            j2ds: self.j2ds.to_device(device)?,
            warp: self.warp.to_device(device)?,
            warp_cycle: self.warp_cycle.to_device(device)?,
            bg_inputs: self.bg_inputs.to_device(device)?,
            src_inputs: self.src_inputs.to_device(device)?,
            tsf_inputs: self.tsf_inputs.to_device(device)?,
            src_fim: self.src_fim.to_device(device)?,
            tsf_fim: self.tsf_fim.to_device(device)?,
            init_preds: self.init_preds.to_device(device)?,
            images: self.images.to_device(device)?,
        })
    }

    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.tsf_inputs.dim(0)?)
    }

    /// Source frames followed by target frames [2N, 3, H, W]
    pub fn stacked_images(&self) -> Result<Tensor> {
        let src = self.images.narrow(1, 0, 1)?.squeeze(1)?;
        let tsf = self.images.narrow(1, 1, 1)?.squeeze(1)?;
        Ok(Tensor::cat(&[&src, &tsf], 0)?)
    }

    /// Joints of one side: 0 for source, 1 for target [N, J, 2]
    pub fn joints(&self, side: usize) -> Result<Tensor> {
        Ok(self.j2ds.narrow(1, side, 1)?.squeeze(1)?)
    }
}

/// Source of batches for post-personalization
pub trait CycleLoader {
    /// Batches of one epoch, in order
    fn epoch(&mut self, epoch: usize) -> Result<Vec<CycleBatch>>;
}

impl CycleLoader for Vec<CycleBatch> {
    fn epoch(&mut self, _epoch: usize) -> Result<Vec<CycleBatch>> {
        Ok(self.clone())
    }
}

fn last_channel(inputs: &Tensor) -> Result<Tensor> {
    let channels = inputs.dim(1)?;
    Ok(inputs.narrow(1, channels - 1, 1)?)
}

fn condition(inputs: &Tensor) -> Result<Tensor> {
    let channels = inputs.dim(1)?;
    Ok(inputs.narrow(1, 3, channels - 3)?)
}

/// Generator inputs for the pass from the synthesized transfer back to the
/// source pose.
///
/// # Returns
/// (background inputs, source inputs, transfer inputs)
pub fn cycle_inputs(
    fake_tsf_imgs: &Tensor,
    src_inputs: &Tensor,
    tsf_inputs: &Tensor,
    warp_cycle: &Tensor,
) -> Result<(Tensor, Tensor, Tensor)> {
    let tsf_bg = last_channel(tsf_inputs)?;
    let tsf_body = tsf_bg.affine(-1.0, 1.0)?;

    let bg_inputs = Tensor::cat(&[&fake_tsf_imgs.broadcast_mul(&tsf_bg)?, &tsf_body], 1)?;
    let src = Tensor::cat(&[&fake_tsf_imgs.broadcast_mul(&tsf_body)?, &condition(tsf_inputs)?], 1)?;
    let cycle_img = grid_sample(fake_tsf_imgs, warp_cycle)?;
    let tsf = Tensor::cat(&[&cycle_img, &condition(src_inputs)?], 1)?;

    Ok((bg_inputs, src, tsf))
}

/// Composited outputs of the forward and cycle passes
pub struct CyclePass {
    pub fake_src_imgs: Tensor,
    pub fake_tsf_imgs: Tensor,
    pub cycle_src_imgs: Tensor,
    pub cycle_tsf_imgs: Tensor,
    pub fake_src_mask: Tensor,
    pub fake_tsf_mask: Tensor,
}

/// Run the generator forward and back for one batch
pub fn cycle_pass(
    generator: &dyn Generator,
    render: &dyn Renderer,
    batch: &CycleBatch,
    background: &Tensor,
    front_warp: bool,
) -> Result<CyclePass> {
    let fake = generator.forward(&batch.bg_inputs, &batch.src_inputs, &batch.tsf_inputs, &batch.warp)?;
    let fake_src_imgs = composite(&fake.src_mask, background, &fake.src_color)?;
    let mut fake_tsf_imgs = composite(&fake.tsf_mask, background, &fake.tsf_color)?;
    if front_warp {
        let front = render.front_mask(&batch.tsf_fim, FaceRegion::FrontalFace)?;
        let warped = batch.tsf_inputs.narrow(1, 0, 3)?;
        fake_tsf_imgs = front_blend(&fake_tsf_imgs, &warped, &front, &fake.tsf_mask)?;
    }

    let (bg_inputs, src_inputs, tsf_inputs) =
        cycle_inputs(&fake_tsf_imgs, &batch.src_inputs, &batch.tsf_inputs, &batch.warp_cycle)?;
    let cycle = generator.forward(&bg_inputs, &src_inputs, &tsf_inputs, &batch.warp_cycle)?;
    let cycle_src_imgs = composite(&cycle.src_mask, background, &cycle.src_color)?;
    let mut cycle_tsf_imgs = composite(&cycle.tsf_mask, background, &cycle.tsf_color)?;
    if front_warp {
        let front = render.front_mask(&batch.src_fim, FaceRegion::FrontalFace)?;
        let source = batch.src_inputs.narrow(1, 0, 3)?;
        cycle_tsf_imgs = front_blend(&cycle_tsf_imgs, &source, &front, &fake.src_mask)?;
    }

    Ok(CyclePass {
        fake_src_imgs,
        fake_tsf_imgs,
        cycle_src_imgs,
        cycle_tsf_imgs,
        fake_src_mask: fake.src_mask,
        fake_tsf_mask: fake.tsf_mask,
    })
}

pub struct PostLosses {
    pub total: Tensor,
    pub cycle: Tensor,
    pub structure: Tensor,
    pub identity: Tensor,
    pub mask: Tensor,
}

impl PostLosses {
    pub fn compute(
        pass: &CyclePass,
        batch: &CycleBatch,
        render: &dyn Renderer,
        identity: &dyn IdentityCriterion,
        weights: &LossWeights,
    ) -> Result<Self> {
        let bs = batch.batch_size()?;
        let src_imgs = batch.stacked_images()?.narrow(0, 0, bs)?;

        let cycle = (l1(&src_imgs, &pass.fake_src_imgs)? + l1(&src_imgs, &pass.cycle_tsf_imgs)?)?;

        let body_mask = last_channel(&batch.src_inputs)?.affine(-1.0, 1.0)?;
        let str_src_imgs = src_imgs.broadcast_mul(&body_mask)?;
        let cycle_warp_imgs = grid_sample(&pass.fake_tsf_imgs, &batch.warp_cycle)?;
        let back_head_mask = render.front_mask(&batch.tsf_fim, FaceRegion::Head)?.affine(-1.0, 1.0)?;
        let masked = l1(
            &str_src_imgs.broadcast_mul(&back_head_mask)?,
            &cycle_warp_imgs.broadcast_mul(&back_head_mask)?,
        )?;
        let structure = (l1(&batch.init_preds, &pass.fake_tsf_imgs)? + masked.affine(weights.masked_structure, 0.0)?)?;

        let kps_src = batch.joints(0)?;
        let kps_tsf = batch.joints(1)?;
        let identity = (identity.loss(&src_imgs, &pass.cycle_tsf_imgs, &kps_src, &kps_src)?
            + identity.loss(&batch.init_preds, &pass.fake_tsf_imgs, &kps_tsf, &kps_tsf)?)?;

        let mask = (bce(&pass.fake_tsf_mask, &last_channel(&batch.tsf_inputs)?)?
            + bce(&pass.fake_src_mask, &last_channel(&batch.src_inputs)?)?)?;

        let total = (cycle.affine(weights.cycle, 0.0)?
            + structure.affine(weights.structure, 0.0)?
            + identity.affine(weights.identity, 0.0)?
            + mask.affine(weights.mask, 0.0)?)?;

        Ok(Self {
            total,
            cycle,
            structure,
            identity,
            mask,
        })
    }

    pub fn record(&self, epoch: usize, step: usize) -> Result<PostStep> {
        Ok(PostStep {
            epoch,
            step,
            total: self.total.to_scalar::<f32>()?,
            cycle: self.cycle.to_scalar::<f32>()?,
            structure: self.structure.to_scalar::<f32>()?,
            identity: self.identity.to_scalar::<f32>()?,
            mask: self.mask.to_scalar::<f32>()?,
        })
    }
}

/// Losses of one optimization step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostStep {
    pub epoch: usize,
    pub step: usize,
    pub total: f32,
    pub cycle: f32,
    pub structure: f32,
    pub identity: f32,
    pub mask: f32,
}

/// One epoch of linear decay from `init_lr` towards `final_lr`
pub fn linear_decay(current_lr: f64, init_lr: f64, final_lr: f64, decay_epochs: usize) -> f64 {
    if decay_epochs == 0 {
        return current_lr;
    }
    current_lr - (init_lr - final_lr) / decay_epochs as f64
}

impl Imitator {
    /// Fine-tune the generator on batches of the current source.
    ///
    /// Runs a fixed number of epochs with no early stop and leaves the
    /// generator in evaluation mode, also on error.
    pub fn post_personalize(
        &mut self,
        session: &Session,
        loader: &mut dyn CycleLoader,
        identity: &dyn IdentityCriterion,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<Vec<PostStep>> {
        self.generator.set_training(true);
        let history = self.train_cycles(session, loader, identity, visualizer);
        self.generator.set_training(false);
        history
    }

    fn train_cycles(
        &mut self,
        session: &Session,
        loader: &mut dyn CycleLoader,
        identity: &dyn IdentityCriterion,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<Vec<PostStep>> {
        let config = self.config.post.clone();
        let background = session.source().bg.detach();

        let params = ParamsAdamW {
            lr: config.lr,
            beta1: 0.5,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let mut optimizer = AdamW::new(self.generator.trainable_vars(), params)?;
        let mut lr = config.lr;
        let log_every = config.log_every.max(1);

        let mut history = Vec::new();
        let mut step = 0;
        for epoch in 0..config.epochs() {
            for batch in loader.epoch(epoch)? {
                let batch = batch.to_device(&self.device)?;
                let pass = cycle_pass(
                    self.generator.as_ref(),
                    self.render.as_ref(),
                    &batch,
                    &background,
                    self.config.front_warp,
                )?;
                let losses = PostLosses::compute(&pass, &batch, self.render.as_ref(), identity, &config.weights)?;
                optimizer.backward_step(&losses.total)?;

                let record = losses.record(epoch, step)?;
                tracing::info!(
                    "epoch = {}, step = {}, total = {:.6}, cyc = {:.6}, str = {:.6}, fid = {:.6}, msk = {:.6}",
                    epoch,
                    step,
                    record.total,
                    record.cycle,
                    record.structure,
                    record.identity,
                    record.mask
                );
                history.push(record);

                if step % log_every == 0 {
                    let images = batch.stacked_images()?;
                    visualize(
                        visualizer,
                        &[
                            ("input_imgs", &images),
                            ("tsf_imgs", &pass.fake_tsf_imgs),
                            ("cyc_imgs", &pass.cycle_tsf_imgs),
                            ("fake_tsf_mask", &pass.fake_tsf_mask),
                        ],
                    )?;
                }
                step += 1;
            }

            if let Some(next) = config.next_lr(epoch, lr) {
                tracing::info!("update G learning rate: {:.6} -> {:.6}", lr, next);
                optimizer.set_learning_rate(next);
                lr = next;
            }
        }

        Ok(history)
    }
}
