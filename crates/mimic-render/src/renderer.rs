//! Renderer collaborator contract.

use candle_core::Tensor;
use mimic_core::Result;

use crate::correspondence::barycentric_transform;

/// Face sets with a dedicated mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceRegion {
    /// Front of the face, used for identity-preserving blending
    FrontalFace,
    /// Whole head including the back
    Head,
}

/// Output of rasterizing a posed mesh
#[derive(Debug, Clone)]
pub struct RenderedFaces {
    /// Projected face corners in normalized device coordinates, y up [N, F, 3, 3]
    pub f2verts: Tensor,
    /// Visible face per pixel, -1 where no face covers the pixel [N, H, W] (i64)
    pub fim: Tensor,
    /// Barycentric weights of the visible face per pixel [N, H, W, 3]
    pub wim: Tensor,
}

/// Mesh renderer producing pixel-space correspondence maps.
///
/// Face-index and weight maps always come from the same `render_fim_wim`
/// call, so they describe the same camera and vertices.
pub trait Renderer {
    /// Square output resolution
    fn image_size(&self) -> usize;

    /// Channels of the condition tensor; the last is background coverage
    fn cond_channels(&self) -> usize;

    /// Rasterize vertices [N, V, 3] seen through cameras [N, 3]
    fn render_fim_wim(&self, cam: &Tensor, verts: &Tensor) -> Result<RenderedFaces>;

    /// Dense condition tensor [N, C, H, W] for a rendered face-index map
    fn encode_fim(&self, cam: &Tensor, verts: &Tensor, fim: &Tensor) -> Result<Tensor>;

    /// Binary mask [N, 1, H, W] of pixels covered by a face region
    fn front_mask(&self, fim: &Tensor, region: FaceRegion) -> Result<Tensor>;

    /// Warp field [N, H, W, 2] sampling source pixels for each target pixel
    fn warp_field(&self, src_p2verts: &Tensor, tgt_fim: &Tensor, tgt_wim: &Tensor) -> Result<Tensor> {
        barycentric_transform(src_p2verts, tgt_fim, tgt_wim)
    }
}
