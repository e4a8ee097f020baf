//! Frame Processing Controller.
//!
//! Owns the volume handle, every reusable per-frame buffer and the camera
//! rig, and decides for each incoming depth frame whether to align,
//! integrate, reset or skip. All engine access is funneled through here on
//! a single processing context; see `system::session` for the threading
//! shell around it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use crossbeam_channel::Sender;
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::camera::{CameraRig, CorrectionState};
use crate::config::{FusionConfig, ProcessorKind};
use crate::engine::{DepthFrame, FloatFrame, FusionRuntime, FusionVolume, VolumeParams};
use crate::geometry::RigidTransform;
use crate::io::mesh_files::{self, MeshFormat};
use crate::processing::result::{FrameOutcome, FrameResult};
use crate::processing::state::TrackingStats;
use crate::system::messages::StatusEvent;
use crate::system::shared_state::SharedState;

/// Consecutive alignment failures after which the volume is reset, when
/// auto-reset on tracking loss is enabled.
pub const MAX_TRACKING_ERRORS: u32 = 100;

/// Timestamp gap forcing a volume reset with GPU-accelerated processing.
const RESET_ON_TIMESTAMP_GAP_MS_GPU: i64 = 1000;

/// Timestamp gap forcing a volume reset with CPU processing.
const RESET_ON_TIMESTAMP_GAP_MS_CPU: i64 = 6000;

/// Alignment iteration count passed to the engine (its documented default).
const ALIGN_ITERATION_COUNT: u32 = 7;

/// Voxel step for mesh extraction: full resolution.
const MESH_VOXEL_STEP: u32 = 1;

/// Floats per point-cloud pixel: position xyz plus normal xyz.
const POINT_CLOUD_STRIDE: usize = 6;

/// Interval between FPS status reports.
const FPS_INTERVAL: Duration = Duration::from_secs(5);

pub struct FrameProcessor {
    runtime: Box<dyn FusionRuntime>,
    /// The engine's volume handle. `None` after a failed creation; every
    /// operation is a safe no-op until a retry succeeds.
    volume: Option<Box<dyn FusionVolume>>,
    config: FusionConfig,
    rig: CameraRig,
    correction: Arc<CorrectionState>,
    stats: TrackingStats,
    world_to_camera: RigidTransform,
    /// World-to-volume transform the engine chose at creation; the reset
    /// path re-derives the shifted transform from this each time.
    default_world_to_volume: RigidTransform,
    depth_float: FloatFrame,
    point_cloud: Vec<f32>,
    width: u32,
    height: u32,
    last_fps_sample: Instant,
    export_index: u32,
    shared: Arc<SharedState>,
    status: Sender<StatusEvent>,
}

impl FrameProcessor {
    pub fn new(
        runtime: Box<dyn FusionRuntime>,
        config: FusionConfig,
        correction: Arc<CorrectionState>,
        shared: Arc<SharedState>,
        status: Sender<StatusEvent>,
    ) -> Self {
        let rig = CameraRig::with_intrinsics(
            Arc::clone(&correction),
            config.primary_intrinsics,
            config.secondary_intrinsics,
        );
        Self {
            runtime,
            volume: None,
            config,
            rig,
            correction,
            stats: TrackingStats::default(),
            world_to_camera: RigidTransform::identity(),
            default_world_to_volume: RigidTransform::identity(),
            depth_float: FloatFrame::default(),
            point_cloud: Vec::new(),
            width: 0,
            height: 0,
            last_fps_sample: Instant::now(),
            export_index: 0,
            shared,
            status,
        }
    }

    pub fn has_volume(&self) -> bool {
        self.volume.is_some()
    }

    /// Latest ray-cast preview, six floats per pixel. Refreshed after
    /// every frame, successful or not, so the preview stays live during
    /// tracking loss.
    pub fn point_cloud(&self) -> &[f32] {
        &self.point_cloud
    }

    /// Run one depth frame through the pipeline.
    pub fn process_frame(&mut self, frame: &DepthFrame) -> FrameResult {
        let mut result = FrameResult {
            outcome: FrameOutcome::Skipped,
            world_to_camera: self.world_to_camera,
            alignment_energy: 0.0,
            consecutive_failures: self.stats.tracking_error_count,
            reset: false,
        };
        if self.volume.is_none() || self.shared.is_saving() {
            return result;
        }

        self.ensure_buffers(frame.width, frame.height);
        result.reset = self.check_reset_timestamp(frame.timestamp_ms);

        self.runtime.depth_to_float(
            frame,
            &mut self.depth_float,
            self.config.min_depth_clip,
            self.config.max_depth_clip,
            self.shared.mirror_depth(),
        );

        let aligned = match self.volume.as_mut() {
            Some(volume) => volume.align(
                &self.depth_float,
                ALIGN_ITERATION_COUNT,
                &self.world_to_camera,
            ),
            None => return result,
        };

        match aligned {
            Err(failure) => {
                self.stats.tracking_error_count += 1;
                result.outcome = FrameOutcome::TrackingFailed;
                result.alignment_energy = failure.energy;
                debug!(
                    consecutive = self.stats.tracking_error_count,
                    "alignment failed"
                );
                let _ = self.status.send(StatusEvent::TrackingFailed {
                    consecutive: self.stats.tracking_error_count,
                });
            }
            Ok(alignment) => {
                self.stats.tracking_error_count = 0;
                self.world_to_camera = alignment.world_to_camera;
                self.rig.update(&alignment.world_to_camera);
                result.alignment_energy = alignment.energy;

                if self.shared.integration_paused() {
                    result.outcome = FrameOutcome::Aligned;
                } else {
                    if let Some(volume) = self.volume.as_mut() {
                        volume.integrate(
                            &self.depth_float,
                            self.config.integration_weight,
                            &self.world_to_camera,
                        );
                    }
                    result.outcome = FrameOutcome::Integrated;
                }
                self.stats.processed_frame_count += 1;
            }
        }

        if self.config.auto_reset_on_loss
            && result.outcome == FrameOutcome::TrackingFailed
            && self.stats.tracking_error_count >= MAX_TRACKING_ERRORS
        {
            let _ = self.status.send(StatusEvent::AutoReset);
            self.reset();
            result.reset = true;
        }

        // Ray-cast unconditionally so the preview stays live even while
        // tracking is lost.
        if let Some(volume) = self.volume.as_mut() {
            volume.calculate_point_cloud(&self.world_to_camera, &mut self.point_cloud);
        }

        result.world_to_camera = self.world_to_camera;
        result.consecutive_failures = self.stats.tracking_error_count;
        self.sample_fps();
        result
    }

    /// Tear down any existing volume and construct a new one from the
    /// given parameters. On failure the handle stays empty and every
    /// subsequent frame is a safe no-op until the user retries.
    pub fn recreate_volume(&mut self, config: FusionConfig) -> bool {
        self.config = config;
        self.volume = None;
        self.world_to_camera = RigidTransform::identity();
        self.rig = CameraRig::with_intrinsics(
            Arc::clone(&self.correction),
            self.config.primary_intrinsics,
            self.config.secondary_intrinsics,
        );

        let params = VolumeParams {
            voxels_per_meter: self.config.voxels_per_meter,
            voxels_x: self.config.voxels_x,
            voxels_y: self.config.voxels_y,
            voxels_z: self.config.voxels_z,
            processor: self.config.processor,
            initial_world_to_camera: self.world_to_camera,
        };

        match self.runtime.create_volume(&params) {
            Ok(volume) => {
                self.default_world_to_volume = volume.world_to_volume();
                self.volume = Some(volume);
                if self.config.translate_reset_pose_by_min_depth {
                    self.reset();
                }
                self.shared.set_pause_integration(false);
                info!(
                    vpm = self.config.voxels_per_meter,
                    x = self.config.voxels_x,
                    y = self.config.voxels_y,
                    z = self.config.voxels_z,
                    "reconstruction volume created"
                );
                let _ = self.status.send(StatusEvent::VolumeCreated);
                true
            }
            Err(error) => {
                warn!(%error, "volume creation failed");
                let _ = self.status.send(StatusEvent::VolumeCreationFailed(error));
                false
            }
        }
    }

    /// Reset the reconstruction to its initial state: identity pose,
    /// optionally shifted volume origin, cleared counters.
    pub fn reset(&mut self) {
        self.stats.reset();
        self.last_fps_sample = Instant::now();
        self.world_to_camera = RigidTransform::identity();

        let Some(volume) = self.volume.as_mut() else {
            return;
        };

        let outcome = if self.config.translate_reset_pose_by_min_depth {
            // Shift the volume's near face past the sensor's minimum
            // sensing range, instead of starting it at the lens where no
            // valid depth exists.
            let mut world_to_volume = self.default_world_to_volume;
            let min_dist = self.config.min_depth_clip.min(self.config.max_depth_clip);
            world_to_volume.offset_translation(Vector3::new(
                0.0,
                0.0,
                -(min_dist * self.config.voxels_per_meter),
            ));
            volume.reset(&self.world_to_camera, Some(&world_to_volume))
        } else {
            volume.reset(&self.world_to_camera, None)
        };

        match outcome {
            Ok(()) => self.shared.set_pause_integration(false),
            Err(error) => {
                warn!(%error, "volume reset failed");
                let _ = self.status.send(StatusEvent::ResetFailed);
            }
        }
    }

    /// Extract the current mesh and write it to `path`. Runs on the
    /// processing context, so it is mutually exclusive with frame handling.
    pub fn save_mesh(&mut self, format: MeshFormat, path: &Path) -> Result<()> {
        let start = Instant::now();
        let outcome = self.save_mesh_inner(format, path);
        // A long export must not read as a playback gap on the next frame.
        if self.stats.last_frame_timestamp_ms != 0 {
            self.stats.last_frame_timestamp_ms += start.elapsed().as_millis() as i64;
        }
        outcome
    }

    fn save_mesh_inner(&mut self, format: MeshFormat, path: &Path) -> Result<()> {
        let Some(volume) = self.volume.as_mut() else {
            let _ = self.status.send(StatusEvent::MeshUnavailable);
            bail!("no active reconstruction volume");
        };

        let _ = self.status.send(StatusEvent::SavingMesh);
        let mesh = match volume.calculate_mesh(MESH_VOXEL_STEP) {
            Ok(mesh) => mesh,
            Err(error) => {
                let _ = self
                    .status
                    .send(StatusEvent::MeshSaveFailed(error.to_string()));
                return Err(error);
            }
        };

        match mesh_files::write_mesh(&mesh, format, path) {
            Ok(()) => {
                let _ = self.status.send(StatusEvent::MeshSaved(path.to_path_buf()));
                Ok(())
            }
            Err(error) => {
                let _ = self
                    .status
                    .send(StatusEvent::MeshSaveFailed(error.to_string()));
                Err(error.into())
            }
        }
    }

    /// Write the camera transform files for the current pose. Returns the
    /// index used in the file names.
    pub fn export_pose(&mut self) -> Result<u32> {
        if self.volume.is_none() {
            bail!("no active reconstruction volume");
        }
        self.export_index += 1;
        let pose = self.world_to_camera;
        self.rig.update(&pose);
        self.rig
            .export_current(&self.config.export_dir, self.export_index)?;
        let _ = self
            .status
            .send(StatusEvent::PoseExported(self.export_index));
        Ok(self.export_index)
    }

    /// (Re)allocate the per-frame buffers when the sensor resolution
    /// changes; steady-state frames reuse them untouched.
    fn ensure_buffers(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height && !self.point_cloud.is_empty() {
            return;
        }
        self.width = width;
        self.height = height;
        self.depth_float.ensure_size(width, height);
        self.point_cloud = vec![0.0; (width as usize) * (height as usize) * POINT_CLOUD_STRIDE];
    }

    /// Large gaps between consecutive frame timestamps (looped recorded
    /// playback, long stalls) desynchronize tracking; recover by forcing a
    /// reset before this frame is processed.
    fn check_reset_timestamp(&mut self, timestamp_ms: i64) -> bool {
        let mut reset = false;
        if self.stats.last_frame_timestamp_ms != 0 {
            let threshold = match self.config.processor {
                ProcessorKind::Gpu => RESET_ON_TIMESTAMP_GAP_MS_GPU,
                ProcessorKind::Cpu => RESET_ON_TIMESTAMP_GAP_MS_CPU,
            };
            let gap_ms = (timestamp_ms - self.stats.last_frame_timestamp_ms).abs();
            if gap_ms >= threshold {
                let _ = self.status.send(StatusEvent::TimestampGapReset { gap_ms });
                self.reset();
                reset = true;
            }
        }
        self.stats.last_frame_timestamp_ms = timestamp_ms;
        reset
    }

    fn sample_fps(&mut self) {
        let elapsed = self.last_fps_sample.elapsed();
        if elapsed < FPS_INTERVAL {
            return;
        }
        let fps = self.stats.processed_frame_count as f64 / elapsed.as_secs_f64();
        let _ = self.status.send(StatusEvent::Fps(fps));
        self.stats.processed_frame_count = 0;
        self.last_fps_sample = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{AlignScript, ScriptedRuntime};
    use crate::engine::{RawMesh, VolumeError};
    use crossbeam_channel::{unbounded, Receiver};
    use nalgebra::Matrix3;

    fn frame(timestamp_ms: i64) -> DepthFrame {
        frame_sized(timestamp_ms, 4, 4)
    }

    fn frame_sized(timestamp_ms: i64, width: u32, height: u32) -> DepthFrame {
        DepthFrame {
            timestamp_ms,
            width,
            height,
            pixels: vec![1500; (width * height) as usize],
        }
    }

    struct Fixture {
        processor: FrameProcessor,
        shared: Arc<SharedState>,
        status: Receiver<StatusEvent>,
        log: Arc<std::sync::Mutex<crate::engine::mock::EngineLog>>,
    }

    fn fixture(runtime: ScriptedRuntime, config: FusionConfig) -> Fixture {
        let log = runtime.log();
        let shared = SharedState::new();
        let (status_tx, status_rx) = unbounded();
        let mut processor = FrameProcessor::new(
            Box::new(runtime),
            config.clone(),
            Arc::new(CorrectionState::new()),
            Arc::clone(&shared),
            status_tx,
        );
        processor.recreate_volume(config);
        Fixture {
            processor,
            shared,
            status: status_rx,
            log,
        }
    }

    fn drain(status: &Receiver<StatusEvent>) -> Vec<StatusEvent> {
        status.try_iter().collect()
    }

    fn resets(fixture: &Fixture) -> usize {
        fixture.log.lock().unwrap().resets
    }

    #[test]
    fn test_successful_frame_integrates_and_updates_pose() {
        let runtime = ScriptedRuntime::new();
        let pose = RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.0, 0.0, 0.5));
        runtime.push_align(AlignScript::Succeed(pose));
        let mut fx = fixture(runtime, FusionConfig::default());

        let result = fx.processor.process_frame(&frame(100));

        assert_eq!(result.outcome, FrameOutcome::Integrated);
        assert_eq!(result.world_to_camera, pose);
        assert_eq!(result.consecutive_failures, 0);
        assert_eq!(fx.log.lock().unwrap().integrations, 1);
        assert_eq!(fx.log.lock().unwrap().point_clouds, 1);
    }

    #[test]
    fn test_failure_counter_counts_and_clears_on_success() {
        let runtime = ScriptedRuntime::new();
        runtime.push_align(AlignScript::Fail);
        runtime.push_align(AlignScript::Fail);
        runtime.push_align(AlignScript::Succeed(RigidTransform::identity()));
        let mut fx = fixture(runtime, FusionConfig::default());

        assert_eq!(fx.processor.process_frame(&frame(100)).consecutive_failures, 1);
        assert_eq!(fx.processor.process_frame(&frame(133)).consecutive_failures, 2);
        let result = fx.processor.process_frame(&frame(166));
        assert_eq!(result.outcome, FrameOutcome::Integrated);
        assert_eq!(result.consecutive_failures, 0);
    }

    #[test]
    fn test_gap_at_gpu_threshold_forces_reset() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());

        fx.processor.process_frame(&frame(1000));
        let before = resets(&fx);
        let result = fx.processor.process_frame(&frame(2000));

        assert!(result.reset);
        assert_eq!(resets(&fx), before + 1);
        assert!(drain(&fx.status)
            .iter()
            .any(|event| matches!(event, StatusEvent::TimestampGapReset { gap_ms: 1000 })));
    }

    #[test]
    fn test_gap_below_gpu_threshold_does_not_reset() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());

        fx.processor.process_frame(&frame(1000));
        let before = resets(&fx);
        let result = fx.processor.process_frame(&frame(1999));

        assert!(!result.reset);
        assert_eq!(resets(&fx), before);
    }

    #[test]
    fn test_cpu_threshold_is_six_seconds() {
        let config = FusionConfig {
            processor: ProcessorKind::Cpu,
            ..FusionConfig::default()
        };
        let mut fx = fixture(ScriptedRuntime::new(), config);

        fx.processor.process_frame(&frame(1000));
        let before = resets(&fx);
        assert!(!fx.processor.process_frame(&frame(6999)).reset);
        assert_eq!(resets(&fx), before);
        assert!(fx.processor.process_frame(&frame(12999)).reset);
    }

    #[test]
    fn test_hundred_failures_do_not_reset_without_auto_reset() {
        let runtime = ScriptedRuntime::new();
        runtime.push_align_n(AlignScript::Fail, 100);
        let mut fx = fixture(runtime, FusionConfig::default());

        let before = resets(&fx);
        let mut last = None;
        for i in 0..100 {
            last = Some(fx.processor.process_frame(&frame(100 + i * 33)));
        }

        let last = last.unwrap();
        assert_eq!(last.consecutive_failures, 100);
        assert!(!last.reset);
        assert_eq!(resets(&fx), before);
    }

    #[test]
    fn test_hundredth_failure_resets_with_auto_reset() {
        let runtime = ScriptedRuntime::new();
        runtime.push_align_n(AlignScript::Fail, 100);
        let config = FusionConfig {
            auto_reset_on_loss: true,
            ..FusionConfig::default()
        };
        let mut fx = fixture(runtime, config);

        let before = resets(&fx);
        let mut last = None;
        for i in 0..100 {
            last = Some(fx.processor.process_frame(&frame(100 + i * 33)));
        }

        let last = last.unwrap();
        assert!(last.reset);
        // The reset clears the failure counter.
        assert_eq!(last.consecutive_failures, 0);
        assert_eq!(resets(&fx), before + 1);
        assert!(drain(&fx.status)
            .iter()
            .any(|event| matches!(event, StatusEvent::AutoReset)));
    }

    #[test]
    fn test_pause_integration_aligns_without_integrating() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());
        fx.shared.set_pause_integration(true);

        let result = fx.processor.process_frame(&frame(100));

        assert_eq!(result.outcome, FrameOutcome::Aligned);
        assert_eq!(fx.log.lock().unwrap().integrations, 0);
        // Preview still runs.
        assert_eq!(fx.log.lock().unwrap().point_clouds, 1);
    }

    #[test]
    fn test_reset_unpauses_integration() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());
        fx.shared.set_pause_integration(true);

        fx.processor.reset();

        assert!(!fx.shared.integration_paused());
    }

    #[test]
    fn test_reset_shifts_volume_by_min_depth() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());

        fx.processor.reset();

        let log = fx.log.lock().unwrap();
        let world_to_volume = log
            .last_reset_world_to_volume
            .expect("reset was called")
            .expect("translate-by-min-depth passes a volume transform");
        // Default config: 0.35m minimum depth at 640 voxels per meter.
        assert_eq!(world_to_volume.translation().z, -(0.35 * 640.0));
    }

    #[test]
    fn test_failed_creation_leaves_processing_a_noop() {
        let runtime = ScriptedRuntime::failing_with(VolumeError::OutOfMemory);
        let mut fx = fixture(runtime, FusionConfig::default());

        assert!(!fx.processor.has_volume());
        assert!(drain(&fx.status).iter().any(|event| matches!(
            event,
            StatusEvent::VolumeCreationFailed(VolumeError::OutOfMemory)
        )));

        let result = fx.processor.process_frame(&frame(100));
        assert_eq!(result.outcome, FrameOutcome::Skipped);
        assert!(fx.processor.export_pose().is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(fx
            .processor
            .save_mesh(MeshFormat::Ply, &dir.path().join("mesh.ply"))
            .is_err());
    }

    #[test]
    fn test_saving_flag_skips_frames() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());
        fx.shared.set_saving(true);

        let result = fx.processor.process_frame(&frame(100));

        assert_eq!(result.outcome, FrameOutcome::Skipped);
        assert_eq!(fx.log.lock().unwrap().point_clouds, 0);
    }

    #[test]
    fn test_buffers_resize_only_on_resolution_change() {
        let mut fx = fixture(ScriptedRuntime::new(), FusionConfig::default());

        fx.processor.process_frame(&frame_sized(100, 4, 4));
        assert_eq!(fx.processor.point_cloud().len(), 16 * POINT_CLOUD_STRIDE);

        fx.processor.process_frame(&frame_sized(133, 8, 8));
        assert_eq!(fx.processor.point_cloud().len(), 64 * POINT_CLOUD_STRIDE);
        assert_eq!(fx.processor.depth_float.pixels.len(), 64);
    }

    #[test]
    fn test_save_mesh_writes_file_and_reports() {
        let mut runtime = ScriptedRuntime::new();
        runtime.mesh = RawMesh {
            positions: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vector3::z(); 3],
            indices: vec![0, 1, 2],
        };
        let mut fx = fixture(runtime, FusionConfig::default());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.ply");
        fx.processor.save_mesh(MeshFormat::Ply, &path).unwrap();

        assert!(path.exists());
        assert!(drain(&fx.status)
            .iter()
            .any(|event| matches!(event, StatusEvent::MeshSaved(_))));
    }

    #[test]
    fn test_mesh_export_duration_does_not_read_as_a_playback_gap() {
        let mut runtime = ScriptedRuntime::new();
        runtime.mesh = RawMesh {
            positions: vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![Vector3::z(); 3],
            indices: vec![0, 1, 2],
        };
        runtime.mesh_delay = Some(Duration::from_millis(50));
        let mut fx = fixture(runtime, FusionConfig::default());

        fx.processor.process_frame(&frame(1000));
        let dir = tempfile::tempdir().unwrap();
        fx.processor
            .save_mesh(MeshFormat::Ply, &dir.path().join("mesh.ply"))
            .unwrap();
        let before = resets(&fx);

        // The export took at least 50ms and that much was added to the last
        // frame timestamp, so a wall-clock gap of exactly the GPU threshold
        // no longer reads as one.
        let result = fx.processor.process_frame(&frame(2000));

        assert!(!result.reset);
        assert_eq!(resets(&fx), before);
    }

    #[test]
    fn test_export_pose_numbers_files_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let config = FusionConfig {
            export_dir: dir.path().to_path_buf(),
            ..FusionConfig::default()
        };
        let mut fx = fixture(ScriptedRuntime::new(), config);

        assert_eq!(fx.processor.export_pose().unwrap(), 1);
        assert_eq!(fx.processor.export_pose().unwrap(), 2);
        assert!(dir.path().join("1.txt").exists());
        assert!(dir.path().join("2.txt").exists());
        // No correction active, so no secondary files.
        assert!(!dir.path().join("matrix1.txt").exists());
    }
}
