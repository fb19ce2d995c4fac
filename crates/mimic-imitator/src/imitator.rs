//! The imitator: networks and collaborators behind one handle.

use candle_core::Device;
use mimic_core::{Error, Result};
use mimic_render::Renderer;

use crate::background::{refine_background, BackgroundRefinement};
use crate::collaborators::{BackgroundNet, Generator, PoseRecovery, Segmenter, Visualizer};
use crate::config::ImitatorConfig;
use crate::nets::{LiteConfig, LiteGenerator, LiteInpaintor};
use crate::session::Session;

/// Collaborators an [`Imitator`] is assembled from
pub struct Networks {
    pub generator: Box<dyn Generator>,
    /// Dedicated inpainting network; the generator's background branch is
    /// used when absent
    pub bgnet: Option<Box<dyn BackgroundNet>>,
    pub hmr: Box<dyn PoseRecovery>,
    pub render: Box<dyn Renderer>,
    pub detector: Option<Box<dyn Segmenter>>,
}

/// Human motion imitator.
///
/// Personalization, transfer and the inference loop only read the
/// networks. The two refinement procedures take `&mut self` and update
/// network weights in place.
pub struct Imitator {
    pub(crate) config: ImitatorConfig,
    pub(crate) device: Device,
    pub(crate) generator: Box<dyn Generator>,
    pub(crate) bgnet: Option<Box<dyn BackgroundNet>>,
    pub(crate) hmr: Box<dyn PoseRecovery>,
    pub(crate) render: Box<dyn Renderer>,
    pub(crate) detector: Option<Box<dyn Segmenter>>,
}

impl Imitator {
    /// Assemble an imitator from ready networks
    pub fn new(config: ImitatorConfig, networks: Networks) -> Result<Self> {
        let device = config.device.device()?;

        if networks.render.image_size() != config.image_size {
            return Err(Error::ShapeMismatch {
                what: "renderer image size",
                expected: config.image_size.to_string(),
                actual: networks.render.image_size().to_string(),
            });
        }
        if networks.render.cond_channels() != config.cond_nc {
            return Err(Error::ShapeMismatch {
                what: "condition channels",
                expected: config.cond_nc.to_string(),
                actual: networks.render.cond_channels().to_string(),
            });
        }
        if config.has_detector && networks.detector.is_none() {
            return Err(Error::Config("has_detector is set but no segmenter was given".to_string()));
        }

        let Networks {
            mut generator,
            mut bgnet,
            hmr,
            render,
            detector,
        } = networks;
        generator.set_training(false);
        if let Some(net) = bgnet.as_mut() {
            net.set_training(false);
        }

        tracing::debug!(
            image_size = config.image_size,
            front_warp = config.front_warp,
            dedicated_bgnet = bgnet.is_some(),
            detector = detector.is_some(),
            "Imitator ready"
        );

        Ok(Self {
            config,
            device,
            generator,
            bgnet,
            hmr,
            render,
            detector,
        })
    }

    /// Build the reference networks and load their weights.
    ///
    /// Fails with a configuration error when no generator weights are
    /// configured.
    pub fn from_config(
        config: ImitatorConfig,
        hmr: Box<dyn PoseRecovery>,
        render: Box<dyn Renderer>,
        detector: Option<Box<dyn Segmenter>>,
    ) -> Result<Self> {
        let weights = config.generator_weights()?;
        let device = config.device.device()?;

        let lite = LiteConfig {
            bg_dim: 4,
            src_dim: config.input_channels(),
            tsf_dim: config.input_channels(),
            hidden: config.generator.hidden,
        };
        let mut generator = LiteGenerator::new(lite, &device)?;
        generator.load(&weights)?;

        let bgnet = match &config.bg_model {
            Some(path) => {
                let mut net = LiteInpaintor::new(4, config.generator.hidden, &device)?;
                net.load(path)?;
                tracing::info!("Loaded background network from {}", path.display());
                Some(Box::new(net) as Box<dyn BackgroundNet>)
            }
            None => None,
        };

        Self::new(
            config,
            Networks {
                generator: Box::new(generator),
                bgnet,
                hmr,
                render,
                detector,
            },
        )
    }

    pub fn config(&self) -> &ImitatorConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn generator(&self) -> &dyn Generator {
        self.generator.as_ref()
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.render.as_ref()
    }

    /// Network used for background estimation and refinement
    pub fn bg_net(&self) -> &dyn BackgroundNet {
        match &self.bgnet {
            Some(net) => net.as_ref(),
            None => self.generator.bg_model(),
        }
    }

    pub fn bg_net_mut(&mut self) -> &mut dyn BackgroundNet {
        match &mut self.bgnet {
            Some(net) => net.as_mut(),
            None => self.generator.bg_model_mut(),
        }
    }

    /// Optimize the background network on the session's visible background
    pub fn refine_background(
        &mut self,
        session: &Session,
        visualizer: Option<&dyn Visualizer>,
    ) -> Result<BackgroundRefinement> {
        let config = self.config.background.clone();
        let bg_inputs = session.source().bg_inputs.clone();
        refine_background(self.bg_net_mut(), &bg_inputs, &config, visualizer)
    }
}
