//! # Mimic-Render
//!
//! Pixel-space correspondence between two body poses.
//!
//! A renderer projects posed mesh vertices into a face-index map (which
//! triangle covers each pixel) and a barycentric weight map. From those:
//!
//! 1. **Condition tensor**: dense per-pixel surface encoding fed to the
//!    generator; its last channel is background coverage
//! 2. **Warp field**: for every target pixel, the source pixel showing the
//!    same surface point, found by interpolating the source's projected
//!    triangle corners with the target's barycentric weights
//! 3. **Resampling**: bilinear grid sampling of a source image through a
//!    warp field (differentiable with respect to the image)
//!
//! Compositing, morphology and a reference CPU rasterizer live here too.

pub mod composite;
pub mod correspondence;
pub mod morph;
pub mod raster;
pub mod renderer;
pub mod sampling;

pub use composite::*;
pub use correspondence::*;
pub use morph::*;
pub use raster::*;
pub use renderer::*;
pub use sampling::*;
