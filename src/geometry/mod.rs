//! Geometry utilities: rigid-body transforms.

pub mod rigid;

pub use rigid::RigidTransform;
