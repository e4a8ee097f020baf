//! Session shell: worker thread, shared flags and status notifications.

pub mod messages;
pub mod session;
pub mod shared_state;

pub use messages::StatusEvent;
pub use session::ReconstructionSession;
pub use shared_state::SharedState;
