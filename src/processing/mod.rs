//! Frame processing: the per-frame state machine around the external
//! reconstruction engine.

pub mod processor;
pub mod result;
pub mod state;

pub use processor::FrameProcessor;
pub use result::{FrameOutcome, FrameResult};
pub use state::TrackingStats;
