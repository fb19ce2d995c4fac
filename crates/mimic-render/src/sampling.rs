//! Bilinear grid sampling.
//!
//! Grid coordinates are normalized to [-1, 1] with pixel centers at
//! `(2i + 1) / size - 1` and zeros outside the image. Sampling weights
//! are derived from the grid on the host; the image side stays a tensor
//! op (`gather`), so gradients flow back into the sampled image.

use candle_core::{DType, Tensor};
use mimic_core::{Error, Result};

/// Sample `img` [N, C, H, W] at `grid` [N, Ho, Wo, 2] (x, y order).
///
/// # Returns
/// Sampled tensor [N, C, Ho, Wo]
pub fn grid_sample(img: &Tensor, grid: &Tensor) -> Result<Tensor> {
    let (n, c, h, w) = img.dims4()?;
    let (grid_n, out_h, out_w, coords) = grid.dims4()?;
    if grid_n != n || coords != 2 {
        return Err(Error::ShapeMismatch {
            what: "sampling grid",
            expected: format!("[{n}, H, W, 2]"),
            actual: format!("{:?}", grid.dims()),
        });
    }

    let taps = bilinear_taps(&grid.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?, h, w);

    let device = img.device();
    let n_out = out_h * out_w;
    let flat = img.reshape((n, c, h * w))?;

    let mut sampled: Option<Tensor> = None;
    for (index, weight) in taps {
        let index = Tensor::from_vec(index, (n, 1, n_out), device)?
            .broadcast_as((n, c, n_out))?
            .contiguous()?;
        let weight = Tensor::from_vec(weight, (n, 1, n_out), device)?.to_dtype(img.dtype())?;
        let contribution = flat.gather(&index, 2)?.broadcast_mul(&weight)?;
        sampled = Some(match sampled {
            Some(acc) => (acc + contribution)?,
            None => contribution,
        });
    }

    match sampled {
        Some(out) => Ok(out.reshape((n, c, out_h, out_w))?),
        None => Err(Error::InvalidInput("empty sampling grid".to_string())),
    }
}

/// Flat indices and weights of the four bilinear neighbours of every grid
/// point. Neighbours outside the image get weight 0 and index 0.
fn bilinear_taps(grid: &[f32], h: usize, w: usize) -> [(Vec<u32>, Vec<f32>); 4] {
    let points = grid.len() / 2;
    let mut taps: [(Vec<u32>, Vec<f32>); 4] =
        std::array::from_fn(|_| (vec![0; points], vec![0.0; points]));

    for p in 0..points {
        let x = ((grid[2 * p] + 1.0) * w as f32 - 1.0) / 2.0;
        let y = ((grid[2 * p + 1] + 1.0) * h as f32 - 1.0) / 2.0;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let neighbours = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x0 + 1.0, y0, fx * (1.0 - fy)),
            (x0, y0 + 1.0, (1.0 - fx) * fy),
            (x0 + 1.0, y0 + 1.0, fx * fy),
        ];

        for (k, (cx, cy, wt)) in neighbours.into_iter().enumerate() {
            if cx >= 0.0 && cy >= 0.0 && cx < w as f32 && cy < h as f32 {
                taps[k].0[p] = (cy as usize * w + cx as usize) as u32;
                taps[k].1[p] = wt;
            }
        }
    }

    taps
}

/// Identity sampling grid [n, h, w, 2] at pixel centers
pub fn identity_grid(n: usize, h: usize, w: usize, device: &candle_core::Device) -> Result<Tensor> {
    let mut coords = Vec::with_capacity(n * h * w * 2);
    for _ in 0..n {
        for i in 0..h {
            for j in 0..w {
                coords.push((2 * j + 1) as f32 / w as f32 - 1.0);
                coords.push((2 * i + 1) as f32 / h as f32 - 1.0);
            }
        }
    }
    Ok(Tensor::from_vec(coords, (n, h, w, 2), device)?)
}
