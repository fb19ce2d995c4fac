#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use candle_core::{Device, Tensor};
use image::{Rgb, RgbImage};
use mimic_core::{BodyDetails, BodyParameters, Camera, Result, POSE_DIM, SHAPE_DIM};
use mimic_imitator::losses::l1;
use mimic_imitator::{
    FrameSink, IdentityCriterion, Imitator, ImitatorConfig, LiteConfig, LiteGenerator, Networks, PoseRecovery,
    Segmentation, Segmenter, Visualizer,
};
use mimic_render::{MeshTopology, SoftRasterizer};

pub const SIZE: usize = 32;
pub const CELLS: usize = 6;

/// Flat body over the plane template. `pose[0]` shears x by y, `shape[0]`
/// scales the body.
pub struct PlaneBody {
    template: Vec<[f32; 3]>,
    estimated: BodyParameters,
    pub estimates: Rc<Cell<usize>>,
}

impl PlaneBody {
    pub fn new(estimated: BodyParameters) -> Self {
        let (_, template) = MeshTopology::plane(CELLS);
        Self {
            template,
            estimated,
            estimates: Rc::new(Cell::new(0)),
        }
    }

    fn deform(params: &BodyParameters, p: [f32; 3]) -> [f32; 3] {
        let scale = 1.0 + params.shape[0];
        let bend = params.pose[0];
        [scale * p[0] + bend * p[1], scale * p[1], p[2]]
    }
}

impl PoseRecovery for PlaneBody {
    fn estimate(&self, image: &Tensor) -> Result<BodyParameters> {
        assert_eq!(image.dims(), &[1, 3, 224, 224]);
        self.estimates.set(self.estimates.get() + 1);
        Ok(self.estimated.clone())
    }

    fn details(&self, params: &BodyParameters) -> Result<BodyDetails> {
        let device = Device::Cpu;
        let verts: Vec<f32> = self
            .template
            .iter()
            .flat_map(|&p| Self::deform(params, p))
            .collect();

        let joints = [[0.0, 0.5, 0.0], [-0.5, 0.0, 0.0], [0.5, 0.0, 0.0], [0.0, -0.5, 0.0], [0.0, 0.0, 0.0]];
        let j3d: Vec<[f32; 3]> = joints.iter().map(|&p| Self::deform(params, p)).collect();
        let cam = params.cam;
        let j2d: Vec<f32> = j3d
            .iter()
            .flat_map(|p| [cam.scale * (p[0] + cam.tx), cam.scale * (p[1] + cam.ty)])
            .collect();

        BodyDetails::new(
            params.clone(),
            Tensor::from_vec(verts, (1, self.template.len(), 3), &device)?,
            Tensor::from_vec(j2d, (1, joints.len(), 2), &device)?,
            Tensor::from_vec(j3d.concat(), (1, joints.len(), 3), &device)?,
        )
    }
}

pub fn params(scale: f32, tx: f32, ty: f32, bend: f32) -> BodyParameters {
    let mut pose = vec![0.0; POSE_DIM];
    pose[0] = bend;
    BodyParameters {
        cam: Camera::new(scale, tx, ty),
        pose,
        shape: vec![0.0; SHAPE_DIM],
    }
}

#[derive(Default)]
pub struct RecordingVisualizer {
    pub names: RefCell<Vec<String>>,
}

impl RecordingVisualizer {
    pub fn saw(&self, name: &str) -> bool {
        self.names.borrow().iter().any(|n| n == name)
    }
}

impl Visualizer for RecordingVisualizer {
    fn show(&self, name: &str, image: &Tensor) -> Result<()> {
        assert_eq!(image.rank(), 4);
        self.names.borrow_mut().push(name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub frames: Vec<(PathBuf, Vec<usize>)>,
}

impl FrameSink for MemorySink {
    fn save(&mut self, frame: &Tensor, path: &Path) -> Result<()> {
        self.frames.push((path.to_path_buf(), frame.dims().to_vec()));
        Ok(())
    }
}

pub struct L1Identity;

impl IdentityCriterion for L1Identity {
    fn loss(&self, a: &Tensor, b: &Tensor, _kps_a: &Tensor, _kps_b: &Tensor) -> Result<Tensor> {
        l1(a, b)
    }
}

pub fn config() -> ImitatorConfig {
    let mut config = ImitatorConfig {
        image_size: SIZE,
        bg_ks: 3,
        ft_ks: 3,
        ..Default::default()
    };
    config.generator.hidden = 8;
    config
}

pub fn lite() -> LiteConfig {
    LiteConfig {
        hidden: 8,
        ..Default::default()
    }
}

pub fn renderer() -> Result<SoftRasterizer> {
    renderer_sized(SIZE)
}

pub fn renderer_sized(size: usize) -> Result<SoftRasterizer> {
    let (topology, _) = MeshTopology::plane(CELLS);
    SoftRasterizer::new(topology, size)
}

/// Random reference networks rendering at `size`, no detector and no
/// dedicated background network. Returns the estimate counter of the
/// pose-recovery stub.
pub fn networks(size: usize) -> Result<(Networks, Rc<Cell<usize>>)> {
    let hmr = PlaneBody::new(params(1.1, 0.05, 0.0, 0.2));
    let estimates = hmr.estimates.clone();
    let networks = Networks {
        generator: Box::new(LiteGenerator::new(lite(), &Device::Cpu)?),
        bgnet: None,
        hmr: Box::new(hmr),
        render: Box::new(renderer_sized(size)?),
        detector: None,
    };
    Ok((networks, estimates))
}

/// Imitator with random reference networks. Returns the estimate counter
/// of the pose-recovery stub.
pub fn imitator(config: ImitatorConfig) -> Result<(Imitator, Rc<Cell<usize>>)> {
    let (networks, estimates) = networks(config.image_size)?;
    Ok((Imitator::new(config, networks)?, estimates))
}

/// Segmenter returning a fixed body mask; records the image sizes it saw
pub struct FixedSegmenter {
    pub mask: Tensor,
    pub seen: Rc<RefCell<Vec<Vec<usize>>>>,
}

impl FixedSegmenter {
    pub fn new(mask: Tensor) -> Self {
        Self {
            mask,
            seen: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Segmenter for FixedSegmenter {
    fn segment(&self, image: &Tensor) -> Result<Segmentation> {
        self.seen.borrow_mut().push(image.dims().to_vec());
        let (_, _, h, w) = self.mask.dims4()?;
        Ok(Segmentation {
            bbox: [0.0, 0.0, w as f32, h as f32],
            body_mask: self.mask.clone(),
        })
    }
}

/// Mask [1, 1, size, size] set on columns `lo..hi`
pub fn column_mask(size: usize, lo: usize, hi: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..size * size)
        .map(|i| if (lo..hi).contains(&(i % size)) { 1.0 } else { 0.0 })
        .collect();
    Ok(Tensor::from_vec(data, (1, 1, size, size), &Device::Cpu)?)
}

/// 48x48 test pattern; `seed` shifts the colors
pub fn pattern(seed: u8) -> RgbImage {
    RgbImage::from_fn(48, 48, |x, y| {
        let r = (x as u8).wrapping_mul(5).wrapping_add(seed);
        let g = (y as u8).wrapping_mul(5).wrapping_add(seed / 2);
        let b = ((x + y) as u8).wrapping_mul(3);
        Rgb([r, g, b])
    })
}

pub fn max_abs(t: &Tensor) -> Result<f32> {
    Ok(t.abs()?.max_all()?.to_scalar::<f32>()?)
}
