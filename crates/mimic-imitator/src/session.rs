//! Per-source session state.
//!
//! A [`Session`] owns everything derived from one personalized source.
//! Personalizing again produces a new session; nothing carries over.

use candle_core::Tensor;
use image::RgbImage;
use mimic_core::{BodyDetails, Camera, Error, Result};
use mimic_render::CorrespondenceMaps;

use crate::collaborators::SourceFeatures;

/// Source identity derived once by personalization
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub details: BodyDetails,
    pub maps: CorrespondenceMaps,
    /// Normalized source image [1, 3, S, S]
    pub img: Tensor,
    /// Source image as loaded
    pub image: RgbImage,
    /// Background estimate [1, 3, S, S]
    pub bg: Tensor,
    /// Visible background followed by the hole mask [1, 4, S, S]
    pub bg_inputs: Tensor,
    /// 1 on the person [1, 1, S, S]
    pub body_mask: Tensor,
    /// 1 on visible background [1, 1, S, S]
    pub bg_mask: Tensor,
    /// Foreground used for feature extraction [1, 1, S, S]
    pub ft_mask: Tensor,
    pub feats: SourceFeatures,
}

/// The most recent target frame
#[derive(Debug, Clone)]
pub struct TransferInfo {
    /// Synthetic body: target pose, source shape
    pub details: BodyDetails,
    pub maps: CorrespondenceMaps,
    /// Source image resampled into the target pose [1, 3, S, S]
    pub tsf_img: Tensor,
    /// Warp field [1, S, S, 2]
    pub warp: Tensor,
    /// Target image as loaded, when the target came from a file
    pub image: Option<RgbImage>,
}

#[derive(Debug, Clone)]
pub struct Session {
    source: SourceInfo,
    transfer: Option<TransferInfo>,
    first_cam: Option<Camera>,
}

impl Session {
    pub fn new(source: SourceInfo) -> Self {
        Self {
            source,
            transfer: None,
            first_cam: None,
        }
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    /// Latest transfer, `NoTransfer` before the first target
    pub fn transfer(&self) -> Result<&TransferInfo> {
        self.transfer.as_ref().ok_or(Error::NoTransfer)
    }

    /// First-frame target camera of the current sequence
    pub fn first_cam(&self) -> Option<&Camera> {
        self.first_cam.as_ref()
    }

    /// Forget the camera anchor and the last transfer
    pub fn reset_sequence(&mut self) {
        self.first_cam = None;
        self.transfer = None;
    }

    pub(crate) fn set_first_cam(&mut self, cam: Camera) {
        self.first_cam = Some(cam);
    }

    pub(crate) fn set_transfer(&mut self, transfer: TransferInfo) {
        self.transfer = Some(transfer);
    }
}
