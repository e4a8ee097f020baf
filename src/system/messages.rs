//! Messages between the session facade, the worker and the embedder.

use std::fmt;
use std::path::PathBuf;

use crossbeam_channel::Sender;

use crate::config::FusionConfig;
use crate::engine::{DepthFrame, VolumeError};
use crate::io::mesh_files::MeshFormat;
use crate::processing::FrameResult;

/// Commands executed on the worker, in submission order.
pub enum Command {
    /// Process one depth frame. Admission control guarantees at most one
    /// of these is queued at a time.
    Frame(DepthFrame),
    /// Reset the reconstruction to its initial state.
    Reset,
    /// Tear down the volume and build a new one from these parameters.
    RecreateVolume(FusionConfig),
    /// Extract the current mesh and write it to `path`; the caller blocks
    /// on `reply`.
    SaveMesh {
        format: MeshFormat,
        path: PathBuf,
        reply: Sender<anyhow::Result<PathBuf>>,
    },
    /// Write the camera transform files for the current pose; the caller
    /// blocks on `reply` and receives the file index.
    ExportPose { reply: Sender<anyhow::Result<u32>> },
    Shutdown,
}

/// Everything the core reports back to the embedding application, on one
/// channel. `Display` renders the status-bar text; none of these events is
/// fatal to the session.
#[derive(Debug)]
pub enum StatusEvent {
    VolumeCreated,
    VolumeCreationFailed(VolumeError),
    VolumeReset,
    ResetFailed,
    /// A large jump between frame timestamps forced a reset.
    TimestampGapReset { gap_ms: i64 },
    TrackingFailed { consecutive: u32 },
    /// Tracking was lost long enough to trigger the automatic reset.
    AutoReset,
    SavingMesh,
    MeshSaved(PathBuf),
    MeshSaveFailed(String),
    MeshUnavailable,
    PoseExported(u32),
    /// A frame finished processing; carries the per-frame result.
    Frame(FrameResult),
    Fps(f64),
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VolumeCreated => write!(f, "reconstruction volume created"),
            Self::VolumeCreationFailed(error) => {
                write!(f, "failed to create reconstruction volume: {error}")
            }
            Self::VolumeReset => write!(f, "reconstruction volume reset"),
            Self::ResetFailed => write!(f, "failed to reset the reconstruction volume"),
            Self::TimestampGapReset { gap_ms } => {
                write!(f, "frame timestamps jumped by {gap_ms} ms; volume reset")
            }
            Self::TrackingFailed { consecutive } => {
                write!(f, "camera tracking failed ({consecutive} in a row)")
            }
            Self::AutoReset => write!(f, "tracking lost; volume reset automatically"),
            Self::SavingMesh => write!(f, "saving mesh..."),
            Self::MeshSaved(path) => write!(f, "mesh saved to {}", path.display()),
            Self::MeshSaveFailed(reason) => write!(f, "failed to save mesh: {reason}"),
            Self::MeshUnavailable => write!(f, "no reconstruction volume to mesh"),
            Self::PoseExported(index) => {
                write!(f, "camera transforms exported for frame {index}")
            }
            Self::Frame(result) => write!(f, "frame processed: {:?}", result.outcome),
            Self::Fps(fps) => write!(f, "{fps:.1} fps"),
        }
    }
}
