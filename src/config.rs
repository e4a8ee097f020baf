//! Reconstruction configuration surface.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::camera::CameraIntrinsics;

/// Which processor backs the reconstruction volume.
///
/// Besides selecting the engine device, this sets the timestamp-gap reset
/// threshold: CPU processing cannot keep up with the sensor in real time,
/// so live frames may legitimately arrive seconds apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Gpu,
    Cpu,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// Volume resolution in voxels per meter; 1000mm / 640vpm is roughly
    /// 1.6mm per voxel.
    #[serde(default = "default_voxels_per_meter")]
    pub voxels_per_meter: f32,
    /// Voxel resolution along X. At 640vpm, 512 voxels span 0.8m.
    #[serde(default = "default_voxels_x")]
    pub voxels_x: u32,
    #[serde(default = "default_voxels_y")]
    pub voxels_y: u32,
    #[serde(default = "default_voxels_z")]
    pub voxels_z: u32,
    /// Weight of each new frame during integration.
    #[serde(default = "default_integration_weight")]
    pub integration_weight: u16,
    /// Depth below this many meters is treated as invalid.
    #[serde(default = "default_min_depth_clip")]
    pub min_depth_clip: f32,
    /// Depth above this many meters is treated as invalid.
    #[serde(default = "default_max_depth_clip")]
    pub max_depth_clip: f32,
    #[serde(default = "default_near_mode")]
    pub near_mode: bool,
    #[serde(default)]
    pub mirror_depth: bool,
    #[serde(default)]
    pub pause_integration: bool,
    /// Reset the volume automatically after 100 consecutive tracking
    /// failures. Off by default; most sessions recover by re-aiming the
    /// sensor instead.
    #[serde(default)]
    pub auto_reset_on_loss: bool,
    #[serde(default = "default_processor")]
    pub processor: ProcessorKind,
    /// Shift the volume's near face past the sensor's minimum sensing
    /// range on reset, so small volumes can be initialized and tracked.
    #[serde(default = "default_translate_reset_pose")]
    pub translate_reset_pose_by_min_depth: bool,
    /// Directory the per-frame transform files are written into.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub primary_intrinsics: CameraIntrinsics,
    /// Secondary cameras are third-party hardware; their intrinsics line
    /// may need different values.
    #[serde(default)]
    pub secondary_intrinsics: CameraIntrinsics,
}

fn default_voxels_per_meter() -> f32 {
    640.0
}
fn default_voxels_x() -> u32 {
    512
}
fn default_voxels_y() -> u32 {
    384
}
fn default_voxels_z() -> u32 {
    512
}
fn default_integration_weight() -> u16 {
    200
}
fn default_min_depth_clip() -> f32 {
    0.35
}
fn default_max_depth_clip() -> f32 {
    8.0
}
fn default_near_mode() -> bool {
    true
}
fn default_processor() -> ProcessorKind {
    ProcessorKind::Gpu
}
fn default_translate_reset_pose() -> bool {
    true
}
fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            voxels_per_meter: default_voxels_per_meter(),
            voxels_x: default_voxels_x(),
            voxels_y: default_voxels_y(),
            voxels_z: default_voxels_z(),
            integration_weight: default_integration_weight(),
            min_depth_clip: default_min_depth_clip(),
            max_depth_clip: default_max_depth_clip(),
            near_mode: default_near_mode(),
            mirror_depth: false,
            pause_integration: false,
            auto_reset_on_loss: false,
            processor: default_processor(),
            translate_reset_pose_by_min_depth: default_translate_reset_pose(),
            export_dir: default_export_dir(),
            primary_intrinsics: CameraIntrinsics::default(),
            secondary_intrinsics: CameraIntrinsics::default(),
        }
    }
}

impl FusionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
