//! Rigid 4x4 homogeneous transforms.
//!
//! Every transform flowing between the engine, the camera rig and the file
//! exporters is a rigid motion: an orthonormal rotation in the upper-left
//! 3x3 block and a translation in the last column. Two logical views appear
//! throughout the crate, world-to-camera and camera-to-world, and for a
//! rigid motion they are mutual inverses.

use nalgebra::{Matrix3, Matrix4, Vector3};

/// A rigid rotation + translation transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    m: Matrix4<f32>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            m: Matrix4::identity(),
        }
    }

    pub fn from_matrix(m: Matrix4<f32>) -> Self {
        Self { m }
    }

    pub fn from_parts(rotation: Matrix3<f32>, translation: Vector3<f32>) -> Self {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
        Self { m }
    }

    /// Build from 16 values in row-major order, as read from matrix files.
    pub fn from_row_major(values: &[f32; 16]) -> Self {
        Self {
            m: Matrix4::from_row_slice(values),
        }
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.m
    }

    pub fn rotation(&self) -> Matrix3<f32> {
        self.m.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f32> {
        self.m.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Add `delta` to the translation column in place.
    pub fn offset_translation(&mut self, delta: Vector3<f32>) {
        self.m[(0, 3)] += delta.x;
        self.m[(1, 3)] += delta.y;
        self.m[(2, 3)] += delta.z;
    }

    /// Invert a rigid motion.
    ///
    /// Exploits orthonormality of the rotation block: the inverse rotation
    /// is the transpose and the inverse translation is `-R^T * t`. Much
    /// cheaper than a general 4x4 inversion, but silently wrong for a
    /// non-rigid input; callers must guarantee rigidity.
    pub fn inverse(&self) -> Self {
        let rt = self.rotation().transpose();
        Self::from_parts(rt, -(rt * self.translation()))
    }

    /// Compose two transforms: `rhs` is applied first, so
    /// `a.compose(&b)` maps a point through `b` and then `a`.
    pub fn compose(&self, rhs: &Self) -> Self {
        Self { m: self.m * rhs.m }
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}
