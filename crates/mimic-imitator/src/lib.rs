//! # Mimic-Imitator
//!
//! Human motion imitation: re-pose a person from one source image into
//! the poses of a target sequence.
//!
//! ## Pipeline
//!
//! 1. **Personalize**: recover the source body, render its correspondence
//!    maps, estimate the background behind the person and encode the
//!    source appearance into a [`Session`]
//! 2. **Transfer**: combine each target pose with the source shape, warp
//!    the source image into it and let the generator synthesize the frame
//! 3. **Refine** (optional): fit the background network to the visible
//!    background, or fine-tune the generator with cycle-consistency losses
//!
//! Pose recovery, rendering, segmentation and identity scoring are
//! collaborators behind traits; [`nets`] provides compact reference
//! networks.

pub mod background;
pub mod collaborators;
pub mod config;
pub mod imaging;
pub mod imitator;
pub mod inference;
pub mod losses;
pub mod nets;
pub mod personalize;
pub mod post;
pub mod session;
pub mod transfer;

pub use background::{BackgroundRefineConfig, BackgroundRefinement, BackgroundStep, NoiseKind};
pub use collaborators::*;
pub use config::{DeviceType, GeneratorConfig, ImitatorConfig};
pub use imaging::{ImageFileSink, ImageInput};
pub use imitator::{Imitator, Networks};
pub use inference::FrameOutput;
pub use nets::{LiteConfig, LiteGenerator, LiteInpaintor};
pub use post::{CycleBatch, CycleLoader, LossWeights, PostPersonalizeConfig, PostStep};
pub use session::{Session, SourceInfo, TransferInfo};
pub use transfer::TargetPose;
