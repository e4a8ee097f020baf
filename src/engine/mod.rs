//! Capability interface of the external volumetric reconstruction engine.
//!
//! The engine (alignment, integration, ray-casting, meshing) is a black box
//! owned by the embedding application. The crate depends only on the traits
//! below, never on engine internals: [`FusionRuntime`] constructs volumes
//! and converts raw depth, [`FusionVolume`] is the handle to one live
//! reconstruction volume.

use anyhow::Result;
use nalgebra::Vector3;
use thiserror::Error;

use crate::config::ProcessorKind;
use crate::geometry::RigidTransform;

/// A single depth frame as delivered by the sensor, depth in millimeters.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub timestamp_ms: i64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u16>,
}

/// Reusable float-depth buffer.
///
/// Owned by the frame processor and resized only when the sensor
/// resolution changes, so steady-state frames allocate nothing.
#[derive(Debug, Default)]
pub struct FloatFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

impl FloatFrame {
    pub fn ensure_size(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height && !self.pixels.is_empty() {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0.0; (width as usize) * (height as usize)];
    }
}

/// Pose and residual returned by a successful alignment.
#[derive(Debug, Clone, Copy)]
pub struct Alignment {
    pub world_to_camera: RigidTransform,
    /// Residual alignment energy reported by the engine.
    pub energy: f32,
}

/// The engine could not align the frame to the current reconstruction
/// with sufficient confidence.
#[derive(Debug, Clone, Copy, Error)]
#[error("camera tracking failed (alignment energy {energy})")]
pub struct TrackingFailure {
    pub energy: f32,
}

/// Why volume construction failed. Any of these leaves the caller without
/// an active volume; frame processing must no-op until a retry succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeError {
    #[error("the requested voxel resolution is not supported")]
    InvalidResolution,
    #[error("a runtime prerequisite of the reconstruction engine is missing")]
    MissingPrerequisite,
    #[error("no supported reconstruction device is available")]
    UnsupportedDevice,
    #[error("not enough memory for the reconstruction volume")]
    OutOfMemory,
}

/// Parameters for constructing a reconstruction volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeParams {
    pub voxels_per_meter: f32,
    pub voxels_x: u32,
    pub voxels_y: u32,
    pub voxels_z: u32,
    pub processor: ProcessorKind,
    pub initial_world_to_camera: RigidTransform,
}

/// Raw triangle mesh as produced by the engine: one vertex per triangle
/// corner, so the index list has the same length as the vertex list.
#[derive(Debug, Clone, Default)]
pub struct RawMesh {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub indices: Vec<u32>,
}

pub trait FusionRuntime: Send {
    /// Construct a new reconstruction volume. The returned box is the
    /// volume handle; dropping it tears the volume down.
    fn create_volume(&mut self, params: &VolumeParams) -> Result<Box<dyn FusionVolume>, VolumeError>;

    /// Convert raw sensor depth into the engine's float format, clamping
    /// to the clip range and optionally mirroring horizontally.
    fn depth_to_float(
        &mut self,
        frame: &DepthFrame,
        out: &mut FloatFrame,
        min_depth: f32,
        max_depth: f32,
        mirror: bool,
    );
}

pub trait FusionVolume: Send {
    /// Align a depth frame to the reconstruction starting from `prior`.
    fn align(
        &mut self,
        depth: &FloatFrame,
        iterations: u32,
        prior: &RigidTransform,
    ) -> Result<Alignment, TrackingFailure>;

    /// Fuse an aligned frame into the volume at the given weight.
    fn integrate(&mut self, depth: &FloatFrame, weight: u16, world_to_camera: &RigidTransform);

    /// Reset the volume to its initial state with the given camera pose
    /// and, optionally, a replacement world-to-volume transform.
    fn reset(
        &mut self,
        world_to_camera: &RigidTransform,
        world_to_volume: Option<&RigidTransform>,
    ) -> Result<()>;

    fn world_to_volume(&self) -> RigidTransform;

    /// Extract a triangle mesh at the given voxel step.
    fn calculate_mesh(&mut self, voxel_step: u32) -> Result<RawMesh>;

    /// Ray-cast the volume from `world_to_camera` into `out`, six floats
    /// per pixel (position xyz, normal xyz).
    fn calculate_point_cloud(&mut self, world_to_camera: &RigidTransform, out: &mut [f32]);
}
