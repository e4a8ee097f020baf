//! World-space transform bookkeeping for the camera rig.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use nalgebra::Vector3;
use serde::Deserialize;

use crate::camera::CorrectionState;
use crate::geometry::RigidTransform;
use crate::io::pose_files;

/// Translation from the depth camera to the color camera, expressed along
/// the camera's own X/Y/Z basis in meters. Adjust if a better calibration
/// is determined.
const LENS_OFFSET: Vector3<f32> = Vector3::new(0.0220, -0.00213, -0.00218);

/// Intrinsics line written into the transform export files: focal length
/// in pixels plus image height and width. Only the ratios matter to the
/// downstream texturing step.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CameraIntrinsics {
    pub focal: f32,
    pub height: u32,
    pub width: u32,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            focal: 525.0,
            height: 480,
            width: 640,
        }
    }
}

/// Current world<->camera transforms for the primary depth camera and the
/// cameras derived from it.
///
/// `update` is fed the raw world-to-depth-camera pose after every
/// successful alignment; the color transform always tracks it, and the
/// secondary transform tracks it while a correction is active.
pub struct CameraRig {
    world_to_camera: RigidTransform,
    color_to_world: RigidTransform,
    secondary_to_world: RigidTransform,
    correction: Arc<CorrectionState>,
    primary_intrinsics: CameraIntrinsics,
    secondary_intrinsics: CameraIntrinsics,
}

impl CameraRig {
    pub fn new(correction: Arc<CorrectionState>) -> Self {
        Self::with_intrinsics(
            correction,
            CameraIntrinsics::default(),
            CameraIntrinsics::default(),
        )
    }

    pub fn with_intrinsics(
        correction: Arc<CorrectionState>,
        primary_intrinsics: CameraIntrinsics,
        secondary_intrinsics: CameraIntrinsics,
    ) -> Self {
        Self {
            world_to_camera: RigidTransform::identity(),
            color_to_world: RigidTransform::identity(),
            secondary_to_world: RigidTransform::identity(),
            correction,
            primary_intrinsics,
            secondary_intrinsics,
        }
    }

    /// Ingest the latest world-to-depth-camera pose.
    ///
    /// Inverts it to camera-to-world, derives the color camera by applying
    /// the lens offset, and, while a correction is active, derives the
    /// secondary camera by composing with the lens-offset-corrected
    /// correction transform.
    pub fn update(&mut self, world_to_depth: &RigidTransform) {
        self.world_to_camera = *world_to_depth;

        let depth_to_world = world_to_depth.inverse();
        self.color_to_world = offset_to_color(&depth_to_world);

        if self.correction.is_active() {
            let corrected = offset_to_color(&self.correction.matrix());
            self.secondary_to_world = depth_to_world.compose(&corrected);
        }
    }

    pub fn world_to_camera(&self) -> &RigidTransform {
        &self.world_to_camera
    }

    pub fn color_to_world(&self) -> &RigidTransform {
        &self.color_to_world
    }

    pub fn secondary_to_world(&self) -> Option<&RigidTransform> {
        self.correction
            .is_active()
            .then_some(&self.secondary_to_world)
    }

    /// Write the transform files for frame `index` into `dir`.
    ///
    /// Always writes `<index>.txt` for the color camera; while a correction
    /// is active also writes `matrix<index>.txt` for the secondary camera
    /// and `WorldToCamera_<index>.txt` with the raw pose.
    pub fn export_current(&self, dir: &Path, index: u32) -> Result<()> {
        pose_files::write_reconstruct_file(
            &dir.join(format!("{index}.txt")),
            &self.color_to_world,
            self.primary_intrinsics,
        )?;

        if self.correction.is_active() {
            pose_files::write_reconstruct_file(
                &dir.join(format!("matrix{index}.txt")),
                &self.secondary_to_world,
                self.secondary_intrinsics,
            )?;
            pose_files::write_world_to_camera_file(
                &dir.join(format!("WorldToCamera_{index}.txt")),
                &self.world_to_camera,
            )?;
        }
        Ok(())
    }
}

/// Shift a camera-to-world transform from the depth camera to the color
/// camera. The lens offset lives in the camera's local frame, so it is
/// rotated into world space by the rotation block before being added to
/// the translation; this is why callers must pass the already-inverted
/// camera-to-world transform, not the raw pose.
fn offset_to_color(camera_to_world: &RigidTransform) -> RigidTransform {
    let mut color = *camera_to_world;
    color.offset_translation(camera_to_world.rotation() * LENS_OFFSET);
    color
}
