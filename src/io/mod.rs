//! File formats consumed and produced by the reconstruction core.

pub mod correction;
pub mod mesh_files;
pub mod pose_files;
