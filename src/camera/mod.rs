//! Camera transform management: primary depth camera, derived color
//! camera, and the externally calibrated secondary camera.

pub mod correction;
pub mod rig;

pub use correction::CorrectionState;
pub use rig::{CameraIntrinsics, CameraRig};
