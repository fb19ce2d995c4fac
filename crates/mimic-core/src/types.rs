//! Body model parameters, per-frame body details and camera strategies.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Weak-perspective camera dimension (scale, tx, ty)
pub const CAM_DIM: usize = 3;
/// Axis-angle pose dimension (24 joints x 3)
pub const POSE_DIM: usize = 72;
/// Identity shape coefficients
pub const SHAPE_DIM: usize = 10;
/// Flattened parameter vector: camera, pose, shape
pub const THETA_DIM: usize = CAM_DIM + POSE_DIM + SHAPE_DIM;

/// Weak-perspective camera: isotropic scale followed by a 2D translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub scale: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Camera {
    pub fn new(scale: f32, tx: f32, ty: f32) -> Self {
        Self { scale, tx, ty }
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        match values {
            [scale, tx, ty] => Ok(Self::new(*scale, *tx, *ty)),
            _ => Err(Error::ShapeMismatch {
                what: "camera",
                expected: CAM_DIM.to_string(),
                actual: values.len().to_string(),
            }),
        }
    }

    pub fn to_array(&self) -> [f32; CAM_DIM] {
        [self.scale, self.tx, self.ty]
    }

    /// Camera tensor of shape [1, 3]
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(self.to_array().to_vec(), (1, CAM_DIM), device)?)
    }
}

/// Compact body description: camera, joint rotations and identity shape.
///
/// Serializes as the flat `[cam | pose | shape]` vector consumed by the
/// pose-recovery model's detail extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct BodyParameters {
    pub cam: Camera,
    pub pose: Vec<f32>,
    pub shape: Vec<f32>,
}

impl BodyParameters {
    pub fn new(cam: Camera, pose: Vec<f32>, shape: Vec<f32>) -> Result<Self> {
        if pose.len() != POSE_DIM {
            return Err(Error::ShapeMismatch {
                what: "pose",
                expected: POSE_DIM.to_string(),
                actual: pose.len().to_string(),
            });
        }
        if shape.len() != SHAPE_DIM {
            return Err(Error::ShapeMismatch {
                what: "shape",
                expected: SHAPE_DIM.to_string(),
                actual: shape.len().to_string(),
            });
        }
        Ok(Self { cam, pose, shape })
    }

    /// Split a flat theta vector into its camera, pose and shape parts
    pub fn from_theta(theta: &[f32]) -> Result<Self> {
        if theta.len() != THETA_DIM {
            return Err(Error::ShapeMismatch {
                what: "theta",
                expected: THETA_DIM.to_string(),
                actual: theta.len().to_string(),
            });
        }
        let cam = Camera::from_slice(&theta[..CAM_DIM])?;
        let pose = theta[CAM_DIM..CAM_DIM + POSE_DIM].to_vec();
        let shape = theta[CAM_DIM + POSE_DIM..].to_vec();
        Self::new(cam, pose, shape)
    }

    pub fn to_theta(&self) -> Vec<f32> {
        let mut theta = Vec::with_capacity(THETA_DIM);
        theta.extend_from_slice(&self.cam.to_array());
        theta.extend_from_slice(&self.pose);
        theta.extend_from_slice(&self.shape);
        theta
    }

    /// Read parameters from a `[1, 85]` or `[85]` tensor
    pub fn from_tensor(theta: &Tensor) -> Result<Self> {
        let values = theta.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        Self::from_theta(&values)
    }

    /// Parameter tensor of shape [1, 85]
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(self.to_theta(), (1, THETA_DIM), device)?)
    }
}

impl TryFrom<Vec<f32>> for BodyParameters {
    type Error = Error;

    fn try_from(theta: Vec<f32>) -> Result<Self> {
        Self::from_theta(&theta)
    }
}

impl From<BodyParameters> for Vec<f32> {
    fn from(params: BodyParameters) -> Self {
        params.to_theta()
    }
}

/// Mesh and joints derived from a set of body parameters.
#[derive(Debug, Clone)]
pub struct BodyDetails {
    pub params: BodyParameters,
    /// Mesh vertices [1, n_verts, 3]
    pub verts: Tensor,
    /// 2D joint locations [1, n_joints, 2]
    pub j2d: Tensor,
    /// 3D joint locations [1, n_joints, 3]
    pub j3d: Tensor,
}

impl BodyDetails {
    pub fn new(params: BodyParameters, verts: Tensor, j2d: Tensor, j3d: Tensor) -> Result<Self> {
        let (_, _, coords) = verts.dims3()?;
        if coords != 3 {
            return Err(Error::ShapeMismatch {
                what: "vertices",
                expected: "[batch, n_verts, 3]".to_string(),
                actual: format!("{:?}", verts.dims()),
            });
        }
        Ok(Self {
            params,
            verts,
            j2d,
            j3d,
        })
    }

    pub fn cam(&self) -> &Camera {
        &self.params.cam
    }

    /// Camera tensor on the same device as the vertices
    pub fn cam_tensor(&self) -> Result<Tensor> {
        self.params.cam.to_tensor(self.verts.device())
    }

    pub fn n_verts(&self) -> usize {
        self.verts.dim(1).unwrap_or(0)
    }
}

/// How the synthesized body is framed when a target pose is applied to the
/// source identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CamStrategy {
    /// Source framing, tracking the target's translation relative to the
    /// first frame of the sequence
    #[default]
    Smooth,
    /// Source camera frozen for every frame
    Source,
    /// Target camera used verbatim
    Target,
}

impl CamStrategy {
    /// Parse a strategy name. Unknown names fall back to `Target`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "smooth" => CamStrategy::Smooth,
            "source" => CamStrategy::Source,
            "target" => CamStrategy::Target,
            other => {
                tracing::warn!(
                    "Unsupported camera strategy '{}', using the target camera",
                    other
                );
                CamStrategy::Target
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CamStrategy::Smooth => "smooth",
            CamStrategy::Source => "source",
            CamStrategy::Target => "target",
        }
    }
}

impl FromStr for CamStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for CamStrategy {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<CamStrategy> for String {
    fn from(strategy: CamStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl fmt::Display for CamStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theta() -> Vec<f32> {
        (0..THETA_DIM).map(|i| i as f32 * 0.01).collect()
    }

    #[test]
    fn test_theta_split() -> Result<()> {
        let params = BodyParameters::from_theta(&theta())?;
        assert_eq!(params.cam, Camera::new(0.0, 0.01, 0.02));
        assert_eq!(params.pose.len(), POSE_DIM);
        assert_eq!(params.shape.len(), SHAPE_DIM);
        assert_eq!(params.to_theta(), theta());
        Ok(())
    }

    #[test]
    fn test_theta_length_checked() {
        let err = BodyParameters::from_theta(&[0.0; 10]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { what: "theta", .. }));
    }

    #[test]
    fn test_tensor_conversion() -> Result<()> {
        let params = BodyParameters::from_theta(&theta())?;
        let t = params.to_tensor(&Device::Cpu)?;
        assert_eq!(t.dims(), &[1, THETA_DIM]);
        assert_eq!(BodyParameters::from_tensor(&t)?, params);
        Ok(())
    }

    #[test]
    fn test_serde_flat_vector() {
        let params = BodyParameters::from_theta(&theta()).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.starts_with('['));
        let back: BodyParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);

        let short: std::result::Result<BodyParameters, _> = serde_json::from_str("[1.0, 2.0]");
        assert!(short.is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(CamStrategy::parse("smooth"), CamStrategy::Smooth);
        assert_eq!(CamStrategy::parse("Source"), CamStrategy::Source);
        assert_eq!(CamStrategy::parse("target"), CamStrategy::Target);
        assert_eq!(CamStrategy::parse("orbit"), CamStrategy::Target);

        let parsed: CamStrategy = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(parsed, CamStrategy::Target);
        assert_eq!(serde_json::to_string(&CamStrategy::Smooth).unwrap(), "\"smooth\"");
    }
}
