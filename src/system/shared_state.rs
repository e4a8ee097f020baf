//! Flags shared between the frame producer, UI-triggered actions and the
//! processing worker.
//!
//! Everything here is an `AtomicBool` accessed with SeqCst so that each
//! side always observes the other's latest write; the producer and the
//! worker run on different threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct SharedState {
    /// A frame is currently being aligned/integrated. At most one frame is
    /// ever in flight; the engine's calls are not re-entrant and are too
    /// slow to queue.
    processing: AtomicBool,
    /// A mesh export is underway; new frames are dropped meanwhile.
    saving: AtomicBool,
    /// The worker should drain its queue and exit.
    shutdown: AtomicBool,
    /// Master switch for frame intake.
    accepting: AtomicBool,
    pause_integration: AtomicBool,
    near_mode: AtomicBool,
    mirror_depth: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the in-flight slot. Returns false if a frame is already being
    /// processed.
    pub fn try_begin_processing(&self) -> bool {
        !self.processing.swap(true, Ordering::SeqCst)
    }

    pub fn end_processing(&self) {
        self.processing.store(false, Ordering::SeqCst);
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn set_saving(&self, saving: bool) {
        self.saving.store(saving, Ordering::SeqCst);
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn set_pause_integration(&self, paused: bool) {
        self.pause_integration.store(paused, Ordering::SeqCst);
    }

    pub fn integration_paused(&self) -> bool {
        self.pause_integration.load(Ordering::SeqCst)
    }

    pub fn set_near_mode(&self, near: bool) {
        self.near_mode.store(near, Ordering::SeqCst);
    }

    /// Whether the sensor should run in near range; consumed by the
    /// embedding application's sensor driver.
    pub fn near_mode(&self) -> bool {
        self.near_mode.load(Ordering::SeqCst)
    }

    pub fn set_mirror_depth(&self, mirrored: bool) {
        self.mirror_depth.store(mirrored, Ordering::SeqCst);
    }

    pub fn mirror_depth(&self) -> bool {
        self.mirror_depth.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            processing: AtomicBool::new(false),
            saving: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            pause_integration: AtomicBool::new(false),
            near_mode: AtomicBool::new(false),
            mirror_depth: AtomicBool::new(false),
        }
    }
}
