//! Reference CPU rasterizer.
//!
//! Weak-perspective projection followed by z-buffered triangle scan
//! conversion at pixel centers. Barycentric weights are computed in screen
//! space, so a warp field between identical poses is exactly the identity.

use candle_core::{DType, Tensor};
use mimic_core::{Error, Result};

use crate::renderer::{FaceRegion, RenderedFaces, Renderer};

const INSIDE_EPS: f32 = 1e-5;

/// Mesh connectivity plus the per-vertex surface code written into the
/// condition tensor.
#[derive(Debug, Clone)]
pub struct MeshTopology {
    pub faces: Vec<[usize; 3]>,
    /// Surface code per vertex; all codes share one length
    pub vertex_codes: Vec<Vec<f32>>,
    pub front_faces: Vec<usize>,
    pub head_faces: Vec<usize>,
}

impl MeshTopology {
    /// Flat square mesh of `cells` x `cells` quads spanning [-0.5, 0.5]²,
    /// coded by (u, v). The top quarter is the head, its middle half the
    /// frontal face.
    ///
    /// # Returns
    /// Topology and template vertices
    pub fn plane(cells: usize) -> (Self, Vec<[f32; 3]>) {
        let cells = cells.max(1);
        let side = cells + 1;
        let mut verts = Vec::with_capacity(side * side);
        let mut vertex_codes = Vec::with_capacity(side * side);
        for r in 0..side {
            for c in 0..side {
                let u = c as f32 / cells as f32;
                let v = r as f32 / cells as f32;
                verts.push([u - 0.5, 0.5 - v, 0.0]);
                vertex_codes.push(vec![u, v]);
            }
        }

        let head_rows = (cells / 4).max(1);
        let (front_lo, front_hi) = (cells / 4, cells - cells / 4);
        let mut faces = Vec::with_capacity(cells * cells * 2);
        let mut front_faces = Vec::new();
        let mut head_faces = Vec::new();
        for r in 0..cells {
            for c in 0..cells {
                let v00 = r * side + c;
                let v01 = v00 + 1;
                let v10 = v00 + side;
                let v11 = v10 + 1;
                for face in [[v00, v01, v10], [v01, v11, v10]] {
                    let id = faces.len();
                    faces.push(face);
                    if r < head_rows {
                        head_faces.push(id);
                        if c >= front_lo && c < front_hi {
                            front_faces.push(id);
                        }
                    }
                }
            }
        }

        (
            Self {
                faces,
                vertex_codes,
                front_faces,
                head_faces,
            },
            verts,
        )
    }
}

/// Software implementation of the `Renderer` contract.
pub struct SoftRasterizer {
    faces: Vec<[usize; 3]>,
    face_codes: Vec<Vec<f32>>,
    code_dim: usize,
    front: Vec<bool>,
    head: Vec<bool>,
    image_size: usize,
}

impl SoftRasterizer {
    pub fn new(topology: MeshTopology, image_size: usize) -> Result<Self> {
        let code_dim = topology.vertex_codes.first().map(Vec::len).unwrap_or(0);
        if topology.vertex_codes.iter().any(|c| c.len() != code_dim) {
            return Err(Error::InvalidInput(
                "vertex codes must share one length".to_string(),
            ));
        }
        let n_verts = topology.vertex_codes.len();
        if topology.faces.iter().flatten().any(|&v| v >= n_verts) {
            return Err(Error::InvalidInput(format!(
                "face references a vertex beyond {n_verts}"
            )));
        }

        // face code = mean of its corner codes
        let face_codes = topology
            .faces
            .iter()
            .map(|face| {
                (0..code_dim)
                    .map(|c| face.iter().map(|&v| topology.vertex_codes[v][c]).sum::<f32>() / 3.0)
                    .collect()
            })
            .collect();

        let n_faces = topology.faces.len();
        let flags = |ids: &[usize]| {
            let mut set = vec![false; n_faces];
            for &id in ids.iter().filter(|&&id| id < n_faces) {
                set[id] = true;
            }
            set
        };
        let front = flags(&topology.front_faces);
        let head = flags(&topology.head_faces);
        tracing::debug!(faces = n_faces, code_dim, image_size, "Soft rasterizer ready");

        Ok(Self {
            faces: topology.faces,
            face_codes,
            code_dim,
            front,
            head,
            image_size,
        })
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// Weak-perspective projection: `scale * (xy + t)`, depth kept
    pub fn project(cam: [f32; 3], vert: [f32; 3]) -> [f32; 3] {
        let [scale, tx, ty] = cam;
        [scale * (vert[0] + tx), scale * (vert[1] + ty), vert[2]]
    }

    /// Scan-convert projected vertices into face ids and barycentric weights
    fn rasterize(&self, projected: &[[f32; 3]]) -> (Vec<i64>, Vec<f32>) {
        let size = self.image_size;
        let s = size as f32;
        let mut depth = vec![f32::INFINITY; size * size];
        let mut fim = vec![-1i64; size * size];
        let mut wim = vec![0f32; size * size * 3];

        for (face_id, face) in self.faces.iter().enumerate() {
            let px = face.map(|v| {
                let p = projected[v];
                [(p[0] + 1.0) * s / 2.0 - 0.5, (1.0 - p[1]) * s / 2.0 - 0.5, p[2]]
            });
            let area = edge(px[0], px[1], px[2]);
            if area.abs() < 1e-12 {
                continue;
            }

            let min_x = px.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).ceil().max(0.0);
            let max_x = px.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max).floor().min(s - 1.0);
            let min_y = px.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).ceil().max(0.0);
            let max_y = px.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max).floor().min(s - 1.0);
            if min_x > max_x || min_y > max_y {
                continue;
            }

            for i in min_y as usize..=max_y as usize {
                for j in min_x as usize..=max_x as usize {
                    let p = [j as f32, i as f32, 0.0];
                    let w0 = edge(px[1], px[2], p) / area;
                    let w1 = edge(px[2], px[0], p) / area;
                    let w2 = edge(px[0], px[1], p) / area;
                    if w0 < -INSIDE_EPS || w1 < -INSIDE_EPS || w2 < -INSIDE_EPS {
                        continue;
                    }

                    let z = w0 * px[0][2] + w1 * px[1][2] + w2 * px[2][2];
                    let pixel = i * size + j;
                    if z < depth[pixel] {
                        depth[pixel] = z;
                        fim[pixel] = face_id as i64;
                        wim[pixel * 3..pixel * 3 + 3].copy_from_slice(&[w0, w1, w2]);
                    }
                }
            }
        }

        (fim, wim)
    }
}

fn edge(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

impl Renderer for SoftRasterizer {
    fn image_size(&self) -> usize {
        self.image_size
    }

    fn cond_channels(&self) -> usize {
        self.code_dim + 1
    }

    fn render_fim_wim(&self, cam: &Tensor, verts: &Tensor) -> Result<RenderedFaces> {
        let cams = cam.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let verts = verts.to_dtype(DType::F32)?.to_vec3::<f32>()?;
        if cams.len() != verts.len() {
            return Err(Error::ShapeMismatch {
                what: "camera batch",
                expected: verts.len().to_string(),
                actual: cams.len().to_string(),
            });
        }

        let n = verts.len();
        let size = self.image_size;
        let n_faces = self.faces.len();
        let mut f2verts = Vec::with_capacity(n * n_faces * 9);
        let mut fims = Vec::with_capacity(n * size * size);
        let mut wims = Vec::with_capacity(n * size * size * 3);

        for (cam, body) in cams.iter().zip(verts.iter()) {
            let cam = [cam[0], cam[1], cam[2]];
            if self.faces.iter().flatten().any(|&v| v >= body.len()) {
                return Err(Error::InvalidInput(format!(
                    "mesh topology needs more than {} vertices",
                    body.len()
                )));
            }
            let projected: Vec<[f32; 3]> = body
                .iter()
                .map(|v| Self::project(cam, [v[0], v[1], v[2]]))
                .collect();

            for face in &self.faces {
                for &v in face {
                    f2verts.extend_from_slice(&projected[v]);
                }
            }
            let (fim, wim) = self.rasterize(&projected);
            fims.extend(fim);
            wims.extend(wim);
        }

        let device = cam.device();
        Ok(RenderedFaces {
            f2verts: Tensor::from_vec(f2verts, (n, n_faces, 3, 3), device)?,
            fim: Tensor::from_vec(fims, (n, size, size), device)?,
            wim: Tensor::from_vec(wims, (n, size, size, 3), device)?,
        })
    }

    fn encode_fim(&self, _cam: &Tensor, _verts: &Tensor, fim: &Tensor) -> Result<Tensor> {
        let (n, h, w) = fim.dims3()?;
        let ids = fim.to_dtype(DType::I64)?.flatten_all()?.to_vec1::<i64>()?;
        let channels = self.code_dim + 1;
        let plane = h * w;
        let mut cond = vec![0f32; n * channels * plane];

        for (k, &face) in ids.iter().enumerate() {
            let (b, pixel) = (k / plane, k % plane);
            let base = b * channels * plane + pixel;
            match usize::try_from(face).ok().and_then(|f| self.face_codes.get(f)) {
                Some(code) => {
                    for (c, &value) in code.iter().enumerate() {
                        cond[base + c * plane] = value;
                    }
                }
                None => cond[base + self.code_dim * plane] = 1.0,
            }
        }

        Ok(Tensor::from_vec(cond, (n, channels, h, w), fim.device())?)
    }

    fn front_mask(&self, fim: &Tensor, region: FaceRegion) -> Result<Tensor> {
        let (n, h, w) = fim.dims3()?;
        let flags = match region {
            FaceRegion::FrontalFace => &self.front,
            FaceRegion::Head => &self.head,
        };
        let mask: Vec<f32> = fim
            .to_dtype(DType::I64)?
            .flatten_all()?
            .to_vec1::<i64>()?
            .into_iter()
            .map(|face| {
                let hit = usize::try_from(face).ok().and_then(|f| flags.get(f)).copied();
                if hit.unwrap_or(false) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Tensor::from_vec(mask, (n, 1, h, w), fim.device())?)
    }
}
