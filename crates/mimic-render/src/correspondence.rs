//! Correspondence maps and barycentric warp fields.

use candle_core::{DType, Tensor};
use mimic_core::{Error, Result};

use crate::renderer::{RenderedFaces, Renderer};

/// Sampling coordinate for pixels with no correspondence. Lies outside the
/// [-1, 1] sampling range, so resampling yields zeros there.
pub const OUT_OF_FRAME: f64 = -2.0;

/// Everything the renderer derives from one camera + vertices pair.
#[derive(Debug, Clone)]
pub struct CorrespondenceMaps {
    /// Projected face corners, renderer convention (y up) [N, F, 3, 3]
    pub f2verts: Tensor,
    /// Projected face corners in sampling convention (y down) [N, F, 3, 2]
    pub p2verts: Tensor,
    /// Face-index map [N, H, W], -1 for background
    pub fim: Tensor,
    /// Barycentric weight map [N, H, W, 3]
    pub wim: Tensor,
    /// Condition tensor [N, C, H, W]
    pub cond: Tensor,
}

impl CorrespondenceMaps {
    /// Render the maps for a posed body.
    ///
    /// With `only_visible`, corners of faces absent from the face-index map
    /// are moved out of frame so occluded surface is never sampled.
    pub fn compute(
        renderer: &dyn Renderer,
        cam: &Tensor,
        verts: &Tensor,
        only_visible: bool,
    ) -> Result<Self> {
        let RenderedFaces { f2verts, fim, wim } = renderer.render_fim_wim(cam, verts)?;
        let cond = renderer.encode_fim(cam, verts, &fim)?;

        let p2verts = flip_y(&f2verts.narrow(3, 0, 2)?)?;
        let p2verts = if only_visible {
            mask_invisible_faces(&p2verts, &fim)?
        } else {
            p2verts
        };

        Ok(Self {
            f2verts,
            p2verts,
            fim,
            wim,
            cond,
        })
    }

    /// Background coverage channel of the condition tensor [N, 1, H, W]
    pub fn bg_channel(&self) -> Result<Tensor> {
        let channels = self.cond.dim(1)?;
        Ok(self.cond.narrow(1, channels - 1, 1)?)
    }
}

/// Negate the y component of `[..., 2]` points
fn flip_y(points: &Tensor) -> Result<Tensor> {
    let last = points.rank() - 1;
    let x = points.narrow(last, 0, 1)?;
    let y = points.narrow(last, 1, 1)?.neg()?;
    Ok(Tensor::cat(&[&x, &y], last)?)
}

/// Reverse barycentric mapping from target pixels to source coordinates.
///
/// # Arguments
/// * `src_p2verts` - Source face corners in sampling convention [N, F, 3, 2]
/// * `tgt_fim` - Target face-index map [N, H, W]
/// * `tgt_wim` - Target barycentric weights [N, H, W, 3]
///
/// # Returns
/// Warp field [N, H, W, 2]; pixels without a face get `OUT_OF_FRAME`
pub fn barycentric_transform(src_p2verts: &Tensor, tgt_fim: &Tensor, tgt_wim: &Tensor) -> Result<Tensor> {
    let (n, n_faces, _, _) = src_p2verts.dims4()?;
    let (fim_n, h, w) = tgt_fim.dims3()?;
    if fim_n != n {
        return Err(Error::ShapeMismatch {
            what: "face-index map batch",
            expected: n.to_string(),
            actual: fim_n.to_string(),
        });
    }
    if n_faces == 0 {
        return Err(Error::InvalidInput("mesh has no faces".to_string()));
    }

    let fim = tgt_fim.to_dtype(DType::I64)?;
    let zeros = fim.zeros_like()?;
    let valid = fim.ge(&zeros)?;
    let index = fim.maximum(&zeros)?.to_dtype(DType::U32)?;
    let wim = tgt_wim.to_dtype(src_p2verts.dtype())?;

    let mut fields = Vec::with_capacity(n);
    for b in 0..n {
        let corners = src_p2verts.get(b)?.index_select(&index.get(b)?.flatten_all()?, 0)?;
        let weights = wim.get(b)?.reshape((h * w, 3, 1))?;
        let coords = corners.broadcast_mul(&weights)?.sum(1)?;
        fields.push(coords.reshape((h, w, 2))?);
    }
    let field = Tensor::stack(&fields, 0)?;

    let outside = (field.ones_like()? * OUT_OF_FRAME)?;
    let valid = valid.unsqueeze(3)?.broadcast_as(field.dims())?;
    Ok(valid.where_cond(&field, &outside)?)
}

/// Move corners of faces that no pixel of `fim` shows out of frame.
pub fn mask_invisible_faces(p2verts: &Tensor, fim: &Tensor) -> Result<Tensor> {
    let (n, n_faces, _, _) = p2verts.dims4()?;
    let ids = fim.to_dtype(DType::I64)?.flatten_all()?.to_vec1::<i64>()?;
    let per_image = ids.len() / n.max(1);

    let mut visible = vec![0u8; n * n_faces];
    for (b, chunk) in ids.chunks(per_image.max(1)).enumerate().take(n) {
        for &face in chunk {
            if face >= 0 && (face as usize) < n_faces {
                visible[b * n_faces + face as usize] = 1;
            }
        }
    }

    let visible = Tensor::from_vec(visible, (n, n_faces, 1, 1), p2verts.device())?
        .broadcast_as(p2verts.dims())?;
    let outside = (p2verts.ones_like()? * OUT_OF_FRAME)?;
    Ok(visible.where_cond(p2verts, &outside)?)
}
