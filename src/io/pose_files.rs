//! Writers for the per-frame camera transform files.
//!
//! The layouts are a stable contract with the downstream 3D-reconstruction
//! tooling that textures meshes from the exported camera poses; reformat
//! nothing here without coordinating with that side.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::camera::CameraIntrinsics;
use crate::geometry::RigidTransform;

/// Labeled translation + rotation + intrinsics layout:
///
/// ```text
/// TVector
/// <tx>
/// <ty>
/// <tz>
///
/// RMatrix
/// <r11>\t<r12>\t<r13>
/// <r21>\t<r22>\t<r23>
/// <r31>\t<r32>\t<r33>
///
/// Camera Intrinsics: focal height width
/// <focal> <height> <width>
/// ```
pub fn write_reconstruct_file(
    path: &Path,
    transform: &RigidTransform,
    intrinsics: CameraIntrinsics,
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let t = transform.translation();
    let r = transform.rotation();

    writeln!(out, "TVector")?;
    writeln!(out, "{}", t.x)?;
    writeln!(out, "{}", t.y)?;
    writeln!(out, "{}", t.z)?;
    writeln!(out)?;
    writeln!(out, "RMatrix")?;
    for row in 0..3 {
        writeln!(out, "{}\t{}\t{}", r[(row, 0)], r[(row, 1)], r[(row, 2)])?;
    }
    writeln!(out)?;
    writeln!(out, "Camera Intrinsics: focal height width")?;
    writeln!(
        out,
        "{} {} {}",
        intrinsics.focal, intrinsics.height, intrinsics.width
    )?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Raw pose dump: four tab-separated values per line, no labels. Each of
/// the first three lines is a rotation row followed by that axis's
/// translation component; the last line is `0 0 0 1`. This is the form the
/// matlab-side tooling reads directly.
pub fn write_world_to_camera_file(path: &Path, transform: &RigidTransform) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let m = transform.matrix();
    for row in 0..4 {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            m[(row, 0)],
            m[(row, 1)],
            m[(row, 2)],
            m[(row, 3)]
        )?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Vector3};

    #[test]
    fn test_reconstruct_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.txt");

        let transform =
            RigidTransform::from_parts(Matrix3::identity(), Vector3::new(0.5, -1.0, 2.0));
        write_reconstruct_file(&path, &transform, CameraIntrinsics::default()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let expected = "TVector\n0.5\n-1\n2\n\nRMatrix\n\
                        1\t0\t0\n0\t1\t0\n0\t0\t1\n\n\
                        Camera Intrinsics: focal height width\n525 480 640\n\n";
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_world_to_camera_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("WorldToCamera_1.txt");

        let transform =
            RigidTransform::from_parts(Matrix3::identity(), Vector3::new(7.0, 8.0, 9.0));
        write_world_to_camera_file(&path, &transform).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // Each rotation row carries its translation component at the end.
        assert_eq!(contents, "1\t0\t0\t7\n0\t1\t0\t8\n0\t0\t1\t9\n0\t0\t0\t1\n");
    }
}
