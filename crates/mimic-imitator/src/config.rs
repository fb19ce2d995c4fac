//! Imitator configuration.

use std::path::{Path, PathBuf};

use candle_core::Device;
use mimic_core::{CamStrategy, Error, Result};
use serde::{Deserialize, Serialize};

use crate::background::BackgroundRefineConfig;
use crate::post::PostPersonalizeConfig;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImitatorConfig {
    /// Working resolution of images, maps and warp fields
    pub image_size: usize,
    /// Input resolution of the pose-recovery model
    pub hmr_image_size: usize,
    /// Blend the warped source into the frontal face region
    pub front_warp: bool,
    /// Only sample source surface visible in the source image
    pub only_vis: bool,
    /// Require a person segmenter for body masks
    pub has_detector: bool,
    /// Erosion kernel for the fallback background mask
    pub bg_ks: usize,
    /// Erosion kernel for the feature-extraction mask
    pub ft_ks: usize,
    /// Condition tensor channels
    pub cond_nc: usize,
    /// Dedicated inpainting network weights; the generator's background
    /// branch is used when absent
    pub bg_model: Option<PathBuf>,
    /// Generator weights
    pub load_path: Option<PathBuf>,
    /// Checkpoint epoch to load when no explicit path is given
    pub load_epoch: usize,
    pub checkpoints_dir: PathBuf,
    /// Experiment name under `checkpoints_dir`
    pub name: String,
    pub device: DeviceType,
    pub generator: GeneratorConfig,
    pub cam_strategy: CamStrategy,
    pub background: BackgroundRefineConfig,
    pub post: PostPersonalizeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceType {
    pub fn device(&self) -> Result<Device> {
        Ok(match self {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda(ordinal) => Device::new_cuda(*ordinal)?,
            DeviceType::Metal => Device::new_metal(0)?,
        })
    }
}

/// Reference generator sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Feature channels of every hidden layer
    pub hidden: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { hidden: 32 }
    }
}

impl Default for ImitatorConfig {
    fn default() -> Self {
        Self {
            image_size: 256,
            hmr_image_size: 224,
            front_warp: true,
            only_vis: false,
            has_detector: false,
            bg_ks: 13,
            ft_ks: 3,
            cond_nc: 3,
            bg_model: None,
            load_path: None,
            load_epoch: 0,
            checkpoints_dir: PathBuf::from("outputs/checkpoints"),
            name: "imitator".to_string(),
            device: DeviceType::Cpu,
            generator: GeneratorConfig::default(),
            cam_strategy: CamStrategy::Smooth,
            background: BackgroundRefineConfig::default(),
            post: PostPersonalizeConfig::default(),
        }
    }
}

impl ImitatorConfig {
    /// Load configuration from file, overridden by `MIMIC__*` variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path))
            .add_source(
                config::Environment::with_prefix("MIMIC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Generator weights: the explicit path, else the checkpoint of
    /// `load_epoch`. Neither is a configuration error.
    pub fn generator_weights(&self) -> Result<PathBuf> {
        match &self.load_path {
            Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
            _ if self.load_epoch > 0 => Ok(self.checkpoint_path(self.load_epoch, "G")),
            _ => Err(Error::Config(format!(
                "load_path {:?} is empty and load_epoch {} is 0",
                self.load_path, self.load_epoch
            ))),
        }
    }

    /// `<checkpoints_dir>/<name>/net_epoch_<epoch>_id_<net>.safetensors`
    pub fn checkpoint_path(&self, epoch: usize, net: &str) -> PathBuf {
        self.checkpoints_dir
            .join(&self.name)
            .join(format!("net_epoch_{epoch}_id_{net}.safetensors"))
    }

    /// Source and transfer input channels: RGB plus condition
    pub fn input_channels(&self) -> usize {
        3 + self.cond_nc
    }
}
