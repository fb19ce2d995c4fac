//! Compact reference networks.
//!
//! Full-resolution conv stacks that satisfy the generator and background
//! network contracts. They keep the data flow of the appearance-flow
//! generator (source encoder, warped source features fused with the
//! transfer branch, color and opacity heads) at a size that runs on CPU.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder, VarMap};
use mimic_core::{Error, Result};
use mimic_render::grid_sample;

use crate::collaborators::{BackgroundNet, Generator, GeneratorOutputs, SourceFeatures};

fn conv3x3(in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
    let config = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    Ok(conv2d(in_channels, out_channels, 3, config, vb)?)
}

fn load_varmap(varmap: &mut VarMap, path: &Path) -> Result<()> {
    varmap
        .load(path)
        .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))
}

/// Layer sizes of the reference networks
#[derive(Debug, Clone)]
pub struct LiteConfig {
    /// Background network input: incomplete image + hole mask
    pub bg_dim: usize,
    /// Source branch input: image + condition
    pub src_dim: usize,
    /// Transfer branch input: warped image + condition
    pub tsf_dim: usize,
    pub hidden: usize,
}

impl Default for LiteConfig {
    fn default() -> Self {
        Self {
            bg_dim: 4,
            src_dim: 6,
            tsf_dim: 6,
            hidden: 32,
        }
    }
}

/// Three-layer inpainting network
pub struct LiteInpaintor {
    conv1: Conv2d,
    conv2: Conv2d,
    out: Conv2d,
    varmap: VarMap,
    training: bool,
}

impl LiteInpaintor {
    /// Randomly initialized network
    pub fn new(in_dim: usize, hidden: usize, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        Self::build(in_dim, hidden, vb.pp("bg"), varmap)
    }

    fn build(in_dim: usize, hidden: usize, vb: VarBuilder, varmap: VarMap) -> Result<Self> {
        Ok(Self {
            conv1: conv3x3(in_dim, hidden, vb.pp("conv1"))?,
            conv2: conv3x3(hidden, hidden, vb.pp("conv2"))?,
            out: conv3x3(hidden, 3, vb.pp("out"))?,
            varmap,
            training: false,
        })
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        load_varmap(&mut self.varmap, path.as_ref())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }
}

impl BackgroundNet for LiteInpaintor {
    fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let x = self.conv1.forward(inputs)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        Ok(self.out.forward(&x)?.tanh()?)
    }

    fn inpaint(&self, image: &Tensor, body_mask: &Tensor) -> Result<Tensor> {
        let visible = body_mask.affine(-1.0, 1.0)?;
        let incomplete = image.broadcast_mul(&visible)?;
        let inputs = Tensor::cat(&[&incomplete, body_mask], 1)?;
        let filled = self.forward(&inputs)?;
        Ok((incomplete + filled.broadcast_mul(body_mask)?)?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Appearance-flow generator with a built-in background branch
pub struct LiteGenerator {
    src_enc1: Conv2d,
    src_enc2: Conv2d,
    tsf_enc: Conv2d,
    fuse: Conv2d,
    color: Conv2d,
    mask: Conv2d,
    bg: LiteInpaintor,
    varmap: VarMap,
    training: bool,
    config: LiteConfig,
}

impl LiteGenerator {
    /// Randomly initialized generator
    pub fn new(config: LiteConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device).pp("gen");
        let h = config.hidden;

        let bg = LiteInpaintor::new(config.bg_dim, h, device)?;

        Ok(Self {
            src_enc1: conv3x3(config.src_dim, h, vb.pp("src_enc1"))?,
            src_enc2: conv3x3(h, h, vb.pp("src_enc2"))?,
            tsf_enc: conv3x3(config.tsf_dim, h, vb.pp("tsf_enc"))?,
            fuse: conv3x3(2 * h, h, vb.pp("fuse"))?,
            color: conv3x3(h, 3, vb.pp("color"))?,
            mask: conv3x3(h, 1, vb.pp("mask"))?,
            bg,
            varmap,
            training: false,
            config,
        })
    }

    /// Load generator and background-branch weights from one safetensors file
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        load_varmap(&mut self.varmap, path)?;
        self.bg.load(path)?;
        tracing::info!("Loaded generator weights from {}", path.display());
        Ok(())
    }

    /// Save generator and background-branch weights into one file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut tensors = std::collections::HashMap::new();
        for varmap in [&self.varmap, &self.bg.varmap] {
            let data = varmap.data().lock().map_err(|e| Error::ModelLoad(e.to_string()))?;
            for (name, var) in data.iter() {
                tensors.insert(name.clone(), var.as_tensor().clone());
            }
        }
        Ok(candle_core::safetensors::save(&tensors, path)?)
    }

    pub fn config(&self) -> &LiteConfig {
        &self.config
    }

    /// Fuse branch features into (color, opacity)
    fn decode(&self, branch: &Tensor, source: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = Tensor::cat(&[branch, source], 1)?;
        let x = self.fuse.forward(&x)?.relu()?;
        let color = self.color.forward(&x)?.tanh()?;
        let mask = candle_nn::ops::sigmoid(&self.mask.forward(&x)?)?;
        Ok((color, mask))
    }
}

impl Generator for LiteGenerator {
    fn encode_src(&self, src_inputs: &Tensor) -> Result<SourceFeatures> {
        let e1 = self.src_enc1.forward(src_inputs)?.relu()?;
        let e2 = self.src_enc2.forward(&e1)?.relu()?;
        Ok(SourceFeatures {
            encoder_outs: vec![e1, e2.clone()],
            resnet_outs: e2,
        })
    }

    fn inference(&self, feats: &SourceFeatures, tsf_inputs: &Tensor, warp: &Tensor) -> Result<(Tensor, Tensor)> {
        let branch = self.tsf_enc.forward(tsf_inputs)?.relu()?;
        let warped = grid_sample(&feats.resnet_outs, warp)?;
        self.decode(&branch, &warped)
    }

    fn forward(
        &self,
        bg_inputs: &Tensor,
        src_inputs: &Tensor,
        tsf_inputs: &Tensor,
        warp: &Tensor,
    ) -> Result<GeneratorOutputs> {
        let bg = self.bg.forward(bg_inputs)?;
        let feats = self.encode_src(src_inputs)?;
        let (src_color, src_mask) = self.decode(&feats.resnet_outs, &feats.resnet_outs)?;
        let (tsf_color, tsf_mask) = self.inference(&feats, tsf_inputs, warp)?;
        Ok(GeneratorOutputs {
            bg,
            src_color,
            src_mask,
            tsf_color,
            tsf_mask,
        })
    }

    fn bg_model(&self) -> &dyn BackgroundNet {
        &self.bg
    }

    fn bg_model_mut(&mut self) -> &mut dyn BackgroundNet {
        &mut self.bg
    }

    fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.varmap.all_vars();
        vars.extend(self.bg.trainable_vars());
        vars
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.bg.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_render::identity_grid;

    fn small() -> LiteConfig {
        LiteConfig {
            hidden: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_generator_shapes() -> Result<()> {
        let device = Device::Cpu;
        let gen = LiteGenerator::new(small(), &device)?;
        let src = Tensor::randn(0f32, 1.0, (1, 6, 8, 8), &device)?;
        let tsf = Tensor::randn(0f32, 1.0, (1, 6, 8, 8), &device)?;
        let bg_inputs = Tensor::randn(0f32, 1.0, (1, 4, 8, 8), &device)?;
        let warp = identity_grid(1, 8, 8, &device)?;

        let feats = gen.encode_src(&src)?;
        let (color, mask) = gen.inference(&feats, &tsf, &warp)?;
        assert_eq!(color.dims(), &[1, 3, 8, 8]);
        assert_eq!(mask.dims(), &[1, 1, 8, 8]);
        let lo = mask.min_all()?.to_scalar::<f32>()?;
        let hi = mask.max_all()?.to_scalar::<f32>()?;
        assert!(lo >= 0.0 && hi <= 1.0);

        let outs = gen.forward(&bg_inputs, &src, &tsf, &warp)?;
        assert_eq!(outs.bg.dims(), &[1, 3, 8, 8]);
        assert_eq!(outs.src_mask.dims(), &[1, 1, 8, 8]);
        Ok(())
    }

    #[test]
    fn test_inpaint_keeps_visible_pixels() -> Result<()> {
        let device = Device::Cpu;
        let net = LiteInpaintor::new(4, 4, &device)?;
        let image = Tensor::rand(-1f32, 1.0, (1, 3, 6, 6), &device)?;
        let mut hole = vec![0f32; 36];
        hole[14] = 1.0;
        hole[15] = 1.0;
        let body = Tensor::from_vec(hole, (1, 1, 6, 6), &device)?;

        let filled = net.inpaint(&image, &body)?;
        let visible = body.affine(-1.0, 1.0)?;
        let diff = (filled - &image)?
            .broadcast_mul(&visible)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_vars_cover_background_branch() -> Result<()> {
        let gen = LiteGenerator::new(small(), &Device::Cpu)?;
        let own = gen.varmap.all_vars().len();
        let bg = gen.bg.trainable_vars().len();
        assert_eq!(gen.trainable_vars().len(), own + bg);
        assert_eq!(bg, 6);
        Ok(())
    }

    #[test]
    fn test_save_load_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gen.safetensors");

        let gen = LiteGenerator::new(small(), &device)?;
        gen.save(&path)?;

        let mut other = LiteGenerator::new(small(), &device)?;
        other.load(&path)?;

        let src = Tensor::randn(0f32, 1.0, (1, 6, 5, 5), &device)?;
        let a = gen.encode_src(&src)?.resnet_outs;
        let b = other.encode_src(&src)?.resnet_outs;
        let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_training_flag_propagates() -> Result<()> {
        let mut gen = LiteGenerator::new(small(), &Device::Cpu)?;
        gen.set_training(true);
        assert!(gen.is_training());
        assert!(gen.bg_model().is_training());
        gen.set_training(false);
        assert!(!gen.bg_model().is_training());
        Ok(())
    }
}
