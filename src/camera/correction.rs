//! Shared correction-transform cell.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::geometry::RigidTransform;
use crate::io::correction::{load_correction_matrix, CorrectionError};

/// Fixed offset between the depth camera and a physically mounted secondary
/// camera.
///
/// Unset at startup, set once by loading a matrix file (usually from a
/// UI-triggered action), and read on every pose update by the processing
/// thread. The `active` flag is the single source of truth all consumers
/// check; it is stored only after a fully successful parse, so a failed
/// load can never expose a half-written matrix.
pub struct CorrectionState {
    matrix: RwLock<RigidTransform>,
    active: AtomicBool,
}

impl CorrectionState {
    pub fn new() -> Self {
        Self {
            matrix: RwLock::new(RigidTransform::identity()),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn matrix(&self) -> RigidTransform {
        *self.matrix.read()
    }

    pub fn set(&self, correction: RigidTransform) {
        *self.matrix.write() = correction;
        self.active.store(true, Ordering::SeqCst);
    }

    /// Parse and activate a correction matrix file. On any error the state
    /// stays exactly as it was.
    pub fn load_from_file(&self, path: &Path) -> Result<(), CorrectionError> {
        let correction = load_correction_matrix(path)?;
        self.set(correction);
        Ok(())
    }
}

impl Default for CorrectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_failed_load_leaves_state_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"1,0,0\n0,1,0,0\n0,0,1,0\n0,0,0,1\n").unwrap();

        let state = CorrectionState::new();
        assert!(state.load_from_file(&path).is_err());
        assert!(!state.is_active());
    }

    #[test]
    fn test_successful_load_activates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("good.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"1,0,0,0\n0,1,0,0\n0,0,1,0\n0,0,0,1\n")
            .unwrap();

        let state = CorrectionState::new();
        state.load_from_file(&path).unwrap();
        assert!(state.is_active());
    }
}
