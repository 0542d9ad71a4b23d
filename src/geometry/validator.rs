//! Geometry validator - aggregate volume and face count of an artifact
//!
//! The validator sits on the hot path of every attempt and must never fail
//! outward: any internal inconsistency is logged and reported as `{0, 0}`,
//! which the engines then classify as empty geometry.

use std::collections::HashMap;

use tracing::warn;

use super::{cross, dot, length, sub, Artifact, Measure, Mesh};

/// Aggregate metrics of a validated artifact
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeometryStats {
    /// Sum of constituent volumes (mm³)
    pub volume: f64,
    /// Sum of constituent face counts
    pub face_count: usize,
}

impl GeometryStats {
    pub fn is_valid(&self) -> bool {
        self.volume.is_finite() && self.volume > 0.0
    }
}

/// Compute total volume and face count across every constituent of `artifact`.
///
/// Multi-body results are treated as one measurable whole: volumes and face
/// counts of disjoint bodies are added.
pub fn analyze_geometry(artifact: &Artifact) -> GeometryStats {
    match try_analyze(artifact) {
        Ok(stats) => stats,
        Err(reason) => {
            warn!(reason = %reason, "geometry analysis failed, reporting empty geometry");
            GeometryStats::default()
        }
    }
}

/// Cheap pass/fail check used while attempts are still being tested.
///
/// Skips face counting but applies the same volume rules as
/// [`analyze_geometry`], so an artifact passes here only if its full
/// analysis is valid too.
pub fn has_positive_volume(artifact: &Artifact) -> bool {
    let volume = match artifact {
        Artifact::Mesh(mesh) => checked_mesh_volume(mesh),
        Artifact::Single(body) => checked_total_volume(std::slice::from_ref(body)),
        Artifact::Compound(bodies) => checked_total_volume(bodies),
    };
    volume.map(|v| v > 0.0).unwrap_or(false)
}

fn try_analyze(artifact: &Artifact) -> Result<GeometryStats, String> {
    let mut stats = GeometryStats::default();

    match artifact {
        Artifact::Mesh(mesh) => {
            stats.volume = checked_mesh_volume(mesh)?;
            stats.face_count = planar_face_count(mesh);
        }
        Artifact::Single(body) => {
            stats.volume = checked_total_volume(std::slice::from_ref(body))?;
            stats.face_count = total_face_count(std::slice::from_ref(body));
        }
        Artifact::Compound(bodies) => {
            stats.volume = checked_total_volume(bodies)?;
            stats.face_count = total_face_count(bodies);
        }
    }

    Ok(stats)
}

/// Sum of constituent volumes; any non-finite part or total is an error
fn checked_total_volume<M: Measure>(constituents: &[M]) -> Result<f64, String> {
    let mut total = 0.0;
    for volume in constituents.iter().filter_map(|constituent| constituent.volume()) {
        if !volume.is_finite() {
            return Err(format!("non-finite volume {}", volume));
        }
        total += volume;
    }
    if total.is_finite() {
        Ok(total)
    } else {
        Err("total volume overflows".to_string())
    }
}

fn total_face_count<M: Measure>(constituents: &[M]) -> usize {
    constituents
        .iter()
        .filter_map(|constituent| constituent.face_count())
        .sum()
}

fn checked_mesh_volume(mesh: &Mesh) -> Result<f64, String> {
    let count = mesh.vertices.len();
    if let Some(bad) = mesh
        .triangles
        .iter()
        .flatten()
        .find(|&&index| index as usize >= count)
    {
        return Err(format!("triangle references vertex {} of {}", bad, count));
    }

    let volume = mesh_volume(mesh).abs();
    if volume.is_finite() {
        Ok(volume)
    } else {
        Err("non-finite mesh volume".to_string())
    }
}

/// Signed volume of a closed triangle mesh (divergence theorem)
pub fn mesh_volume(mesh: &Mesh) -> f64 {
    mesh.triangles
        .iter()
        .map(|triangle| {
            let a = mesh.vertices[triangle[0] as usize];
            let b = mesh.vertices[triangle[1] as usize];
            let c = mesh.vertices[triangle[2] as usize];
            dot(a, cross(b, c)) / 6.0
        })
        .sum()
}

/// Count faces of a mesh as connected groups of coplanar triangles.
///
/// Interchange meshes lose the B-rep face structure; planar faces are
/// recovered exactly, curved surfaces count once per facet.
pub fn planar_face_count(mesh: &Mesh) -> usize {
    const PLANE_QUANTUM: f64 = 1e-4;

    let quantize = |value: f64| (value / PLANE_QUANTUM).round() as i64;

    let mut planes: Vec<Option<[i64; 4]>> = Vec::with_capacity(mesh.triangles.len());
    for tri in &mesh.triangles {
        let a = mesh.vertices[tri[0] as usize];
        let b = mesh.vertices[tri[1] as usize];
        let c = mesh.vertices[tri[2] as usize];
        let normal = cross(sub(b, a), sub(c, a));
        let len = length(normal);
        if len <= f64::EPSILON {
            planes.push(None);
            continue;
        }
        let n = [normal[0] / len, normal[1] / len, normal[2] / len];
        let offset = dot(n, a);
        planes.push(Some([
            quantize(n[0]),
            quantize(n[1]),
            quantize(n[2]),
            quantize(offset),
        ]));
    }

    let mut parent: Vec<usize> = (0..mesh.triangles.len()).collect();
    let mut edge_owner: HashMap<(u32, u32), usize> = HashMap::new();

    for (index, tri) in mesh.triangles.iter().enumerate() {
        let Some(plane) = planes[index] else {
            continue;
        };
        for (u, v) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let edge = if u < v { (u, v) } else { (v, u) };
            match edge_owner.get(&edge) {
                Some(&other) if planes[other] == Some(plane) => union(&mut parent, index, other),
                Some(_) => {}
                None => {
                    edge_owner.insert(edge, index);
                }
            }
        }
    }

    (0..mesh.triangles.len())
        .filter(|&index| planes[index].is_some() && find(&mut parent, index) == index)
        .count()
}

fn find(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    if root_a != root_b {
        parent[root_a] = root_b;
    }
}
