//! Mesh export: binary STL, ASCII OBJ and ASCII PLY.
//!
//! STL and OBJ write the engine's raw corner-per-triangle mesh as-is; the
//! PLY path welds duplicate vertices first and indexes into the compacted
//! list. Downstream consumers depend on that split, so it stays.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::engine::RawMesh;
use crate::mesh::remove_duplicate_vertices;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    /// Binary STL, little-endian.
    Stl,
    /// ASCII Wavefront OBJ.
    Obj,
    /// ASCII polygon file format.
    Ply,
}

#[derive(Debug, Error)]
pub enum MeshExportError {
    #[error("mesh is empty")]
    EmptyMesh,
    #[error("vertex count {0} is not a multiple of 3")]
    PartialTriangle(usize),
    #[error("index count {indices} does not match vertex count {vertices}")]
    CountMismatch { vertices: usize, indices: usize },
    #[error("failed to write mesh file: {0}")]
    Io(#[from] io::Error),
}

/// Validate the mesh shape and write it to `path` in the given format.
pub fn write_mesh(mesh: &RawMesh, format: MeshFormat, path: &Path) -> Result<(), MeshExportError> {
    validate(mesh)?;
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    match format {
        MeshFormat::Stl => write_stl(mesh, &mut out)?,
        MeshFormat::Obj => write_obj(mesh, &mut out)?,
        MeshFormat::Ply => write_ply(mesh, &mut out)?,
    }
    out.flush()?;
    Ok(())
}

/// The engine hands back one vertex per triangle corner; every writer
/// relies on that shape.
fn validate(mesh: &RawMesh) -> Result<(), MeshExportError> {
    if mesh.positions.is_empty() {
        return Err(MeshExportError::EmptyMesh);
    }
    if mesh.positions.len() % 3 != 0 {
        return Err(MeshExportError::PartialTriangle(mesh.positions.len()));
    }
    if mesh.indices.len() != mesh.positions.len() {
        return Err(MeshExportError::CountMismatch {
            vertices: mesh.positions.len(),
            indices: mesh.indices.len(),
        });
    }
    Ok(())
}

/// 80-byte header, u32 triangle count, then per triangle: normal, three
/// vertices, u16 attribute. All floats little-endian.
fn write_stl<W: Write>(mesh: &RawMesh, out: &mut W) -> io::Result<()> {
    out.write_all(&[0u8; 80])?;

    let triangles = mesh.positions.len() / 3;
    out.write_all(&(triangles as u32).to_le_bytes())?;

    for i in 0..triangles {
        // One normal per facet; the engine stores it on every corner.
        let normal = mesh.normals[i * 3];
        for value in [normal.x, normal.y, normal.z] {
            out.write_all(&value.to_le_bytes())?;
        }
        for corner in 0..3 {
            let vertex = mesh.positions[i * 3 + corner];
            for value in [vertex.x, vertex.y, vertex.z] {
                out.write_all(&value.to_le_bytes())?;
            }
        }
        out.write_all(&0u16.to_le_bytes())?;
    }
    Ok(())
}

/// `v`/`vn`/`f` records; face indices are 1-based and reference position
/// and normal with the same index.
fn write_obj<W: Write>(mesh: &RawMesh, out: &mut W) -> io::Result<()> {
    writeln!(out, "#")?;
    writeln!(out, "# OBJ file created by depthfusion")?;
    writeln!(out, "#")?;

    for vertex in &mesh.positions {
        writeln!(out, "v {} {} {}", vertex.x, vertex.y, vertex.z)?;
    }
    for normal in &mesh.normals {
        writeln!(out, "vn {} {} {}", normal.x, normal.y, normal.z)?;
    }
    for i in 0..mesh.positions.len() / 3 {
        let (a, b, c) = (i * 3 + 1, i * 3 + 2, i * 3 + 3);
        writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}")?;
    }
    Ok(())
}

/// ASCII PLY over the welded mesh: compact vertex element, face records
/// prefixed with their vertex count.
fn write_ply<W: Write>(mesh: &RawMesh, out: &mut W) -> io::Result<()> {
    let welded = remove_duplicate_vertices(mesh);

    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "comment created by depthfusion")?;
    writeln!(out, "element vertex {}", welded.positions.len())?;
    writeln!(out, "property float x")?;
    writeln!(out, "property float y")?;
    writeln!(out, "property float z")?;
    writeln!(out, "element face {}", welded.indices.len() / 3)?;
    writeln!(out, "property list uchar int vertex_indices")?;
    writeln!(out, "end_header")?;

    for vertex in &welded.positions {
        writeln!(out, "{} {} {}", vertex.x, vertex.y, vertex.z)?;
    }
    for triangle in welded.indices.chunks_exact(3) {
        writeln!(out, "3 {} {} {}", triangle[0], triangle[1], triangle[2])?;
    }
    Ok(())
}
