//! Session facade: owns the worker thread that serializes all engine
//! access.
//!
//! The sensor delivers frames at its own rate on its own thread;
//! processing happens on a single worker so only one frame is ever being
//! aligned/integrated. Admission control lives in `submit_frame`: the
//! in-flight flag is claimed before dispatch and released by the worker
//! when the frame completes, and frames arriving in between are dropped.
//! Mesh save and pose export run on the same worker (mutually exclusive
//! with frame processing) while the calling thread blocks on a reply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::camera::CorrectionState;
use crate::config::FusionConfig;
use crate::engine::{DepthFrame, FusionRuntime};
use crate::io::correction::CorrectionError;
use crate::io::mesh_files::MeshFormat;
use crate::processing::FrameProcessor;

use super::messages::{Command, StatusEvent};
use super::shared_state::SharedState;

/// Capacity of the worker command channel. Frames occupy at most one slot
/// (admission control drops the rest); the remainder absorbs user actions.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Timeout on the worker's receive so shutdown checks stay responsive.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ReconstructionSession {
    shared: Arc<SharedState>,
    correction: Arc<CorrectionState>,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl ReconstructionSession {
    /// Spawn the worker and create the initial volume. The returned
    /// receiver carries every status notification the core emits; volume
    /// creation failure arrives there as a named event rather than failing
    /// this call.
    pub fn start(
        runtime: Box<dyn FusionRuntime>,
        config: FusionConfig,
    ) -> (Self, Receiver<StatusEvent>) {
        let shared = SharedState::new();
        let correction = Arc::new(CorrectionState::new());
        let (status_tx, status_rx) = crossbeam_channel::unbounded();
        let (cmd_tx, cmd_rx) = bounded(COMMAND_CHANNEL_CAPACITY);

        shared.set_pause_integration(config.pause_integration);
        shared.set_near_mode(config.near_mode);
        shared.set_mirror_depth(config.mirror_depth);

        let worker = {
            let shared = Arc::clone(&shared);
            let correction = Arc::clone(&correction);
            thread::spawn(move || {
                let mut processor = FrameProcessor::new(
                    runtime,
                    config.clone(),
                    correction,
                    Arc::clone(&shared),
                    status_tx.clone(),
                );
                processor.recreate_volume(config);
                run_worker(&mut processor, &shared, &status_tx, &cmd_rx);
            })
        };

        (
            Self {
                shared,
                correction,
                commands: cmd_tx,
                worker: Some(worker),
            },
            status_rx,
        )
    }

    /// Offer a new depth frame. Returns false if the frame was dropped:
    /// intake is off, an export is running, or a frame is already in
    /// flight.
    pub fn submit_frame(&self, frame: DepthFrame) -> bool {
        if !self.shared.is_accepting() || self.shared.is_saving() {
            return false;
        }
        if !self.shared.try_begin_processing() {
            return false;
        }
        if self.commands.try_send(Command::Frame(frame)).is_err() {
            self.shared.end_processing();
            return false;
        }
        true
    }

    /// Load a correction matrix from a 4x4 text file; takes effect on the
    /// next pose update. On error the correction state is unchanged.
    pub fn load_correction(&self, path: &Path) -> Result<(), CorrectionError> {
        self.correction.load_from_file(path)
    }

    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Tear down the volume and build a new one from `config`.
    pub fn recreate_volume(&self, config: FusionConfig) {
        let _ = self.commands.send(Command::RecreateVolume(config));
    }

    /// Extract the current mesh and write it to `path`. Blocks until the
    /// export finishes; frame intake is suppressed while it runs.
    pub fn save_mesh(&self, format: MeshFormat, path: impl Into<PathBuf>) -> Result<PathBuf> {
        let (reply_tx, reply_rx) = bounded(1);
        self.shared.set_saving(true);
        let sent = self.commands.send(Command::SaveMesh {
            format,
            path: path.into(),
            reply: reply_tx,
        });
        if sent.is_err() {
            self.shared.set_saving(false);
            return Err(anyhow!("processing worker is gone"));
        }
        match reply_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                self.shared.set_saving(false);
                Err(anyhow!("processing worker stopped during mesh export"))
            }
        }
    }

    /// Write the camera transform files for the current pose. Blocks until
    /// the files are on disk and returns the index used in their names.
    pub fn export_pose(&self) -> Result<u32> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Command::ExportPose { reply: reply_tx })
            .map_err(|_| anyhow!("processing worker is gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("processing worker stopped during pose export"))?
    }

    /// Pause or resume frame intake entirely.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.set_accepting(accepting);
    }

    pub fn set_pause_integration(&self, paused: bool) {
        self.shared.set_pause_integration(paused);
    }

    pub fn set_near_mode(&self, near: bool) {
        self.shared.set_near_mode(near);
    }

    /// Mirroring changes the geometry the engine sees; reset so stale
    /// geometry does not fight the mirrored frames.
    pub fn set_mirror_depth(&self, mirrored: bool) {
        self.shared.set_mirror_depth(mirrored);
        self.reset();
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// Stop dispatching, drain the worker and join it. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        let _ = self.commands.try_send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ReconstructionSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    processor: &mut FrameProcessor,
    shared: &Arc<SharedState>,
    status: &Sender<StatusEvent>,
    commands: &Receiver<Command>,
) {
    loop {
        if shared.is_shutdown_requested() {
            break;
        }
        match commands.recv_timeout(RECV_TIMEOUT) {
            Ok(command) => handle_command(processor, shared, status, command),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_command(
    processor: &mut FrameProcessor,
    shared: &Arc<SharedState>,
    status: &Sender<StatusEvent>,
    command: Command,
) {
    match command {
        Command::Frame(frame) => {
            let result = processor.process_frame(&frame);
            // `process_frame` is infallible, so the in-flight slot is
            // always released here.
            shared.end_processing();
            debug!(outcome = ?result.outcome, "frame handled");
            let _ = status.send(StatusEvent::Frame(result));
        }
        Command::Reset => {
            processor.reset();
            let _ = status.send(StatusEvent::VolumeReset);
        }
        Command::RecreateVolume(config) => {
            processor.recreate_volume(config);
        }
        Command::SaveMesh {
            format,
            path,
            reply,
        } => {
            let outcome = processor.save_mesh(format, &path).map(|()| path);
            shared.set_saving(false);
            let _ = reply.send(outcome);
        }
        Command::ExportPose { reply } => {
            let _ = reply.send(processor.export_pose());
        }
        Command::Shutdown => {
            shared.request_shutdown();
        }
    }
}
