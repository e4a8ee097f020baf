//! Vertex welding for engine meshes.
//!
//! The engine emits one vertex per triangle corner; downstream tooling
//! wants a compact vertex list with shared corners. Welding is pure and
//! order-preserving: unique vertices keep their first-occurrence order and
//! surviving triangles keep their relative order, so running it on its own
//! output is a no-op.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::engine::RawMesh;

/// A mesh with a unique vertex list and only non-degenerate triangles.
#[derive(Debug, Clone, PartialEq)]
pub struct WeldedMesh {
    pub positions: Vec<Vector3<f32>>,
    pub indices: Vec<u32>,
}

/// Collapse duplicate vertex positions and drop any triangle left with a
/// repeated corner after the merge.
///
/// Positions compare by exact bit pattern, never by tolerance; nearby but
/// unequal vertices stay distinct.
pub fn remove_duplicate_vertices(mesh: &RawMesh) -> WeldedMesh {
    let mut ids: HashMap<[u32; 3], u32> = HashMap::with_capacity(mesh.positions.len());
    let mut positions = Vec::new();
    let mut dense_id = Vec::with_capacity(mesh.positions.len());

    for position in &mesh.positions {
        let key = [
            position.x.to_bits(),
            position.y.to_bits(),
            position.z.to_bits(),
        ];
        let id = *ids.entry(key).or_insert_with(|| {
            positions.push(*position);
            (positions.len() - 1) as u32
        });
        dense_id.push(id);
    }

    let remapped: Vec<u32> = mesh
        .indices
        .iter()
        .map(|&index| dense_id[index as usize])
        .collect();

    let mut indices = Vec::with_capacity(remapped.len());
    for triangle in remapped.chunks_exact(3) {
        if triangle[0] == triangle[1] || triangle[0] == triangle[2] || triangle[1] == triangle[2] {
            continue;
        }
        indices.extend_from_slice(triangle);
    }

    WeldedMesh { positions, indices }
}
