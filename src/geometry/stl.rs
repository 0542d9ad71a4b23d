//! STL interchange files
//!
//! Export writes ASCII STL. Import accepts both ASCII and binary STL, since
//! out-of-process modelers commonly write the binary flavour, and welds the
//! triangle soup into an indexed mesh so faces can be reconstructed.

use std::collections::HashMap;
use std::path::Path;

use super::{cross, length, sub, Mesh};

/// Error type for STL import
#[derive(Debug)]
pub enum StlError {
    Io(std::io::Error),
    /// File is neither valid ASCII nor binary STL
    Malformed(String),
    /// File parsed but contains no triangles
    Empty,
}

impl std::fmt::Display for StlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StlError::Io(e) => write!(f, "IO error: {}", e),
            StlError::Malformed(msg) => write!(f, "Malformed STL: {}", msg),
            StlError::Empty => write!(f, "STL file contains no triangles"),
        }
    }
}

impl std::error::Error for StlError {}

impl From<std::io::Error> for StlError {
    fn from(e: std::io::Error) -> Self {
        StlError::Io(e)
    }
}

fn triangle_normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let n = cross(sub(b, a), sub(c, a));
    let len = length(n);
    if len <= f64::EPSILON {
        [0.0, 0.0, 0.0]
    } else {
        [n[0] / len, n[1] / len, n[2] / len]
    }
}

pub fn to_ascii_stl(mesh: &Mesh, name: &str) -> String {
    let mut out = String::new();
    out.push_str("solid ");
    out.push_str(name);
    out.push('\n');

    for tri in &mesh.triangles {
        let a = mesh.vertices[tri[0] as usize];
        let b = mesh.vertices[tri[1] as usize];
        let c = mesh.vertices[tri[2] as usize];
        let n = triangle_normal(a, b, c);

        out.push_str(&format!("  facet normal {} {} {}\n", n[0], n[1], n[2]));
        out.push_str("    outer loop\n");
        out.push_str(&format!("      vertex {} {} {}\n", a[0], a[1], a[2]));
        out.push_str(&format!("      vertex {} {} {}\n", b[0], b[1], b[2]));
        out.push_str(&format!("      vertex {} {} {}\n", c[0], c[1], c[2]));
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }

    out.push_str("endsolid ");
    out.push_str(name);
    out.push('\n');
    out
}

/// Write `mesh` as ASCII STL to `path`
pub fn write_stl(path: &Path, mesh: &Mesh, name: &str) -> std::io::Result<()> {
    std::fs::write(path, to_ascii_stl(mesh, name))
}

/// Read an ASCII or binary STL file into a welded mesh
pub fn read_stl(path: &Path) -> Result<Mesh, StlError> {
    let bytes = std::fs::read(path)?;
    parse_stl(&bytes)
}

pub fn parse_stl(bytes: &[u8]) -> Result<Mesh, StlError> {
    let soup = if is_binary(bytes) {
        parse_binary(bytes)?
    } else if skip_leading_whitespace(bytes).starts_with(b"solid") {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| StlError::Malformed(format!("ASCII STL is not UTF-8: {}", e)))?;
        parse_ascii(text)?
    } else {
        return Err(StlError::Malformed(
            "unrecognized header (expected 'solid' or binary layout)".to_string(),
        ));
    };

    if soup.is_empty() {
        return Err(StlError::Empty);
    }
    Ok(weld(&soup))
}

fn skip_leading_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    bytes.len() == 84 + count * 50
}

fn parse_binary(bytes: &[u8]) -> Result<Mesh, StlError> {
    let mut mesh = Mesh::empty();
    for record in bytes[84..].chunks_exact(50) {
        // Skip the 12-byte normal; it is recomputed from the winding.
        let mut corners = [[0.0f64; 3]; 3];
        for (corner, out) in corners.iter_mut().enumerate() {
            for (axis, value) in out.iter_mut().enumerate() {
                let start = 12 + corner * 12 + axis * 4;
                let raw = [
                    record[start],
                    record[start + 1],
                    record[start + 2],
                    record[start + 3],
                ];
                *value = f32::from_le_bytes(raw) as f64;
            }
        }
        mesh.push_triangle(corners);
    }
    Ok(mesh)
}

fn parse_ascii(text: &str) -> Result<Mesh, StlError> {
    let mut mesh = Mesh::empty();
    let mut pending: Vec<[f64; 3]> = Vec::with_capacity(3);

    for (line_no, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("vertex") => {
                let coords = parts
                    .map(|token| token.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| {
                        StlError::Malformed(format!("line {}: bad coordinate: {}", line_no + 1, e))
                    })?;
                if coords.len() != 3 {
                    return Err(StlError::Malformed(format!(
                        "line {}: vertex needs 3 coordinates, found {}",
                        line_no + 1,
                        coords.len()
                    )));
                }
                pending.push([coords[0], coords[1], coords[2]]);
            }
            Some("endloop") => {
                if pending.len() != 3 {
                    return Err(StlError::Malformed(format!(
                        "line {}: facet has {} vertices",
                        line_no + 1,
                        pending.len()
                    )));
                }
                mesh.push_triangle([pending[0], pending[1], pending[2]]);
                pending.clear();
            }
            _ => {}
        }
    }

    Ok(mesh)
}

/// Merge coincident vertices so triangles share indices
pub fn weld(soup: &Mesh) -> Mesh {
    const WELD_QUANTUM: f64 = 1e-6;

    let key = |p: [f64; 3]| p.map(|v| (v / WELD_QUANTUM).round() as i64);
    let mut index_of: HashMap<[i64; 3], u32> = HashMap::new();
    let mut welded = Mesh::empty();

    for tri in &soup.triangles {
        let mut indices = [0u32; 3];
        for (slot, &vertex) in indices.iter_mut().zip(tri.iter()) {
            let position = soup.vertices[vertex as usize];
            *slot = *index_of.entry(key(position)).or_insert_with(|| {
                welded.vertices.push(position);
                (welded.vertices.len() - 1) as u32
            });
        }
        welded.triangles.push(indices);
    }

    welded
}
