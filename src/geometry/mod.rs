//! Artifact model produced by the execution engines
//!
//! An `Artifact` is what a generated program evaluates to: a single body, a
//! compound of bodies, or a triangle mesh recovered from an interchange file.
//! Solids are kept analytic (primitive + placement) so volume and face counts
//! are exact; tessellation happens only on export.
//!
//! # Layout
//!
//! ```text
//! Artifact ─┬─ Single(Body)
//!           ├─ Compound(Vec<Body>)       Body ─┬─ Solid   (volume + faces)
//!           └─ Mesh(Mesh)                      └─ Profile (faces only)
//! ```

pub mod stl;
pub mod validator;

use std::f64::consts::PI;

pub use validator::{analyze_geometry, has_positive_volume, GeometryStats};

/// Anything the validator can measure.
///
/// A constituent that has no notion of volume (a planar profile) returns `None`
/// and simply does not contribute to the total.
pub trait Measure {
    fn volume(&self) -> Option<f64>;
    fn face_count(&self) -> Option<usize>;
}

/// Affine placement: `p' = linear * p + translation`, with a uniform scale
/// tracked separately so volumes can be scaled without a determinant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub linear: [[f64; 3]; 3],
    pub translation: [f64; 3],
    pub scale: f64,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            linear: IDENTITY,
            translation: [0.0; 3],
            scale: 1.0,
        }
    }
}

const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

impl Placement {
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        add(mat_vec(&self.linear, p), self.translation)
    }

    pub fn translated(mut self, offset: [f64; 3]) -> Self {
        self.translation = add(self.translation, offset);
        self
    }

    /// Rotate about the world origin by XYZ Euler angles in degrees
    pub fn rotated(mut self, degrees: [f64; 3]) -> Self {
        let rotation = euler_xyz(degrees);
        self.linear = mat_mul(&rotation, &self.linear);
        self.translation = mat_vec(&rotation, self.translation);
        self
    }

    /// Uniform scale about the world origin
    pub fn scaled(mut self, factor: f64) -> Self {
        for row in self.linear.iter_mut() {
            for value in row.iter_mut() {
                *value *= factor;
            }
        }
        self.translation = scale_vec(self.translation, factor);
        self.scale *= factor;
        self
    }

    fn volume_factor(&self) -> f64 {
        self.scale.powi(3)
    }
}

/// Analytic solid primitives, all centred on the local origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolidKind {
    Box { width: f64, depth: f64, height: f64 },
    Cylinder { radius: f64, height: f64 },
    Sphere { radius: f64 },
    Cone { radius1: f64, radius2: f64, height: f64 },
    Torus { major_radius: f64, minor_radius: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solid {
    pub kind: SolidKind,
    pub placement: Placement,
}

impl Solid {
    pub fn new(kind: SolidKind) -> Self {
        Self {
            kind,
            placement: Placement::default(),
        }
    }

    fn local_volume(&self) -> f64 {
        match self.kind {
            SolidKind::Box {
                width,
                depth,
                height,
            } => width * depth * height,
            SolidKind::Cylinder { radius, height } => PI * radius * radius * height,
            SolidKind::Sphere { radius } => 4.0 / 3.0 * PI * radius.powi(3),
            SolidKind::Cone {
                radius1,
                radius2,
                height,
            } => PI * height / 3.0 * (radius1 * radius1 + radius1 * radius2 + radius2 * radius2),
            SolidKind::Torus {
                major_radius,
                minor_radius,
            } => 2.0 * PI * PI * major_radius * minor_radius * minor_radius,
        }
    }

    /// Append this solid's tessellation, in world coordinates, to `mesh`
    pub fn tessellate_into(&self, mesh: &mut Mesh) {
        let mut local = Mesh::empty();
        match self.kind {
            SolidKind::Box {
                width,
                depth,
                height,
            } => tessellate_box(&mut local, width / 2.0, depth / 2.0, height / 2.0),
            SolidKind::Cylinder { radius, height } => {
                tessellate_frustum(&mut local, radius, radius, height)
            }
            SolidKind::Cone {
                radius1,
                radius2,
                height,
            } => tessellate_frustum(&mut local, radius1, radius2, height),
            SolidKind::Sphere { radius } => tessellate_sphere(&mut local, radius),
            SolidKind::Torus {
                major_radius,
                minor_radius,
            } => tessellate_torus(&mut local, major_radius, minor_radius),
        }

        for tri in &local.triangles {
            let corners = tri.map(|i| self.placement.apply(local.vertices[i as usize]));
            mesh.push_triangle(corners);
        }
    }
}

impl Measure for Solid {
    fn volume(&self) -> Option<f64> {
        Some(self.local_volume() * self.placement.volume_factor())
    }

    fn face_count(&self) -> Option<usize> {
        let faces = match self.kind {
            SolidKind::Box { .. } => 6,
            SolidKind::Cylinder { .. } => 3,
            SolidKind::Sphere { .. } | SolidKind::Torus { .. } => 1,
            SolidKind::Cone {
                radius1, radius2, ..
            } => {
                if radius1 == 0.0 || radius2 == 0.0 {
                    2
                } else {
                    3
                }
            }
        };
        Some(faces)
    }
}

/// Planar sketch profiles, lying in the local XY plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileKind {
    Rect { width: f64, depth: f64 },
    Circle { radius: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Profile {
    pub kind: ProfileKind,
    pub placement: Placement,
}

impl Profile {
    pub fn new(kind: ProfileKind) -> Self {
        Self {
            kind,
            placement: Placement::default(),
        }
    }

    /// Sweep the profile along its local +Z by `height`
    pub fn extrude(&self, height: f64) -> Solid {
        let kind = match self.kind {
            ProfileKind::Rect { width, depth } => SolidKind::Box {
                width,
                depth,
                height,
            },
            ProfileKind::Circle { radius } => SolidKind::Cylinder { radius, height },
        };
        // Primitives are centred; lift by half the height so the base sits on the sketch plane.
        let lift = mat_vec(&self.placement.linear, [0.0, 0.0, height / 2.0]);
        Solid {
            kind,
            placement: self.placement.translated(lift),
        }
    }
}

impl Measure for Profile {
    fn volume(&self) -> Option<f64> {
        None
    }

    fn face_count(&self) -> Option<usize> {
        Some(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Body {
    Solid(Solid),
    Profile(Profile),
}

impl Body {
    pub fn map_placement(self, f: impl Fn(Placement) -> Placement) -> Self {
        match self {
            Body::Solid(mut solid) => {
                solid.placement = f(solid.placement);
                Body::Solid(solid)
            }
            Body::Profile(mut profile) => {
                profile.placement = f(profile.placement);
                Body::Profile(profile)
            }
        }
    }
}

impl Measure for Body {
    fn volume(&self) -> Option<f64> {
        match self {
            Body::Solid(solid) => solid.volume(),
            Body::Profile(profile) => profile.volume(),
        }
    }

    fn face_count(&self) -> Option<usize> {
        match self {
            Body::Solid(solid) => solid.face_count(),
            Body::Profile(profile) => profile.face_count(),
        }
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Push a triangle without vertex sharing
    pub fn push_triangle(&mut self, corners: [[f64; 3]; 3]) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.triangles.push([base, base + 1, base + 2]);
    }

    fn push_quad(&mut self, a: [f64; 3], b: [f64; 3], c: [f64; 3], d: [f64; 3]) {
        self.push_triangle([a, b, c]);
        self.push_triangle([a, c, d]);
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// What a generated program evaluates to
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Single(Body),
    Compound(Vec<Body>),
    Mesh(Mesh),
}

impl Artifact {
    /// Flatten into a list of bodies; meshes have no body structure
    pub fn into_bodies(self) -> Vec<Body> {
        match self {
            Artifact::Single(body) => vec![body],
            Artifact::Compound(bodies) => bodies,
            Artifact::Mesh(_) => Vec::new(),
        }
    }

    pub fn body_count(&self) -> usize {
        match self {
            Artifact::Single(_) => 1,
            Artifact::Compound(bodies) => bodies.len(),
            Artifact::Mesh(_) => 1,
        }
    }

    /// Tessellate every solid; profiles carry no volume and are skipped
    pub fn to_mesh(&self) -> Mesh {
        match self {
            Artifact::Mesh(mesh) => mesh.clone(),
            Artifact::Single(body) => {
                let mut mesh = Mesh::empty();
                if let Body::Solid(solid) = body {
                    solid.tessellate_into(&mut mesh);
                }
                mesh
            }
            Artifact::Compound(bodies) => {
                let mut mesh = Mesh::empty();
                for body in bodies {
                    if let Body::Solid(solid) = body {
                        solid.tessellate_into(&mut mesh);
                    }
                }
                mesh
            }
        }
    }
}

const ROUND_SEGMENTS: usize = 48;
const SPHERE_STACKS: usize = 24;
const TORUS_TUBE_SEGMENTS: usize = 24;

fn tessellate_box(mesh: &mut Mesh, hx: f64, hy: f64, hz: f64) {
    let p = |sx: f64, sy: f64, sz: f64| [sx * hx, sy * hy, sz * hz];
    // Each quad is listed counter-clockwise as seen from outside.
    mesh.push_quad(p(-1., -1., -1.), p(-1., 1., -1.), p(1., 1., -1.), p(1., -1., -1.));
    mesh.push_quad(p(-1., -1., 1.), p(1., -1., 1.), p(1., 1., 1.), p(-1., 1., 1.));
    mesh.push_quad(p(-1., -1., -1.), p(1., -1., -1.), p(1., -1., 1.), p(-1., -1., 1.));
    mesh.push_quad(p(-1., 1., -1.), p(-1., 1., 1.), p(1., 1., 1.), p(1., 1., -1.));
    mesh.push_quad(p(-1., -1., -1.), p(-1., -1., 1.), p(-1., 1., 1.), p(-1., 1., -1.));
    mesh.push_quad(p(1., -1., -1.), p(1., 1., -1.), p(1., 1., 1.), p(1., -1., 1.));
}

fn tessellate_frustum(mesh: &mut Mesh, r1: f64, r2: f64, height: f64) {
    let z0 = -height / 2.0;
    let z1 = height / 2.0;
    let ring = |r: f64, z: f64, i: usize| {
        let theta = 2.0 * PI * (i % ROUND_SEGMENTS) as f64 / ROUND_SEGMENTS as f64;
        [r * theta.cos(), r * theta.sin(), z]
    };

    for i in 0..ROUND_SEGMENTS {
        let b0 = ring(r1, z0, i);
        let b1 = ring(r1, z0, i + 1);
        let t0 = ring(r2, z1, i);
        let t1 = ring(r2, z1, i + 1);
        mesh.push_quad(b0, b1, t1, t0);
        if r1 > 0.0 {
            mesh.push_triangle([[0.0, 0.0, z0], b1, b0]);
        }
        if r2 > 0.0 {
            mesh.push_triangle([[0.0, 0.0, z1], t0, t1]);
        }
    }
}

fn tessellate_sphere(mesh: &mut Mesh, radius: f64) {
    let point = |stack: usize, slice: usize| {
        let phi = PI * stack as f64 / SPHERE_STACKS as f64;
        let theta = 2.0 * PI * (slice % ROUND_SEGMENTS) as f64 / ROUND_SEGMENTS as f64;
        [
            radius * phi.sin() * theta.cos(),
            radius * phi.sin() * theta.sin(),
            radius * phi.cos(),
        ]
    };

    for stack in 0..SPHERE_STACKS {
        for slice in 0..ROUND_SEGMENTS {
            mesh.push_quad(
                point(stack, slice),
                point(stack + 1, slice),
                point(stack + 1, slice + 1),
                point(stack, slice + 1),
            );
        }
    }
}

fn tessellate_torus(mesh: &mut Mesh, major: f64, minor: f64) {
    let point = |i: usize, j: usize| {
        let u = 2.0 * PI * (i % ROUND_SEGMENTS) as f64 / ROUND_SEGMENTS as f64;
        let v = 2.0 * PI * (j % TORUS_TUBE_SEGMENTS) as f64 / TORUS_TUBE_SEGMENTS as f64;
        let ring = major + minor * v.cos();
        [ring * u.cos(), ring * u.sin(), minor * v.sin()]
    };

    for i in 0..ROUND_SEGMENTS {
        for j in 0..TORUS_TUBE_SEGMENTS {
            mesh.push_quad(point(i, j), point(i + 1, j), point(i + 1, j + 1), point(i, j + 1));
        }
    }
}

fn euler_xyz(degrees: [f64; 3]) -> [[f64; 3]; 3] {
    let [ax, ay, az] = degrees.map(f64::to_radians);
    let rx = [
        [1.0, 0.0, 0.0],
        [0.0, ax.cos(), -ax.sin()],
        [0.0, ax.sin(), ax.cos()],
    ];
    let ry = [
        [ay.cos(), 0.0, ay.sin()],
        [0.0, 1.0, 0.0],
        [-ay.sin(), 0.0, ay.cos()],
    ];
    let rz = [
        [az.cos(), -az.sin(), 0.0],
        [az.sin(), az.cos(), 0.0],
        [0.0, 0.0, 1.0],
    ];
    mat_mul(&rz, &mat_mul(&ry, &rx))
}

fn mat_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, value) in out_row.iter_mut().enumerate() {
            *value = (0..3).map(|k| a[row][k] * b[k][col]).sum();
        }
    }
    out
}

fn mat_vec(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub(crate) fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn scale_vec(v: [f64; 3], factor: f64) -> [f64; 3] {
    [v[0] * factor, v[1] * factor, v[2] * factor]
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn length(v: [f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::validator::mesh_volume;

    fn cube(size: f64) -> Solid {
        Solid::new(SolidKind::Box {
            width: size,
            depth: size,
            height: size,
        })
    }

    #[test]
    fn test_box_tessellation_is_closed_and_outward() {
        let mut mesh = Mesh::empty();
        cube(10.0).tessellate_into(&mut mesh);
        assert_eq!(mesh.triangles.len(), 12);
        assert!((mesh_volume(&mesh) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_tessellations_approximate_volume() {
        let shapes = [
            Solid::new(SolidKind::Cylinder {
                radius: 5.0,
                height: 10.0,
            }),
            Solid::new(SolidKind::Sphere { radius: 5.0 }),
            Solid::new(SolidKind::Cone {
                radius1: 5.0,
                radius2: 0.0,
                height: 10.0,
            }),
            Solid::new(SolidKind::Torus {
                major_radius: 10.0,
                minor_radius: 2.0,
            }),
        ];

        for solid in shapes {
            let mut mesh = Mesh::empty();
            solid.tessellate_into(&mut mesh);
            let exact = solid.volume().unwrap();
            let approx = mesh_volume(&mesh);
            assert!(approx > 0.0, "{:?} tessellated inside out", solid.kind);
            assert!(
                (approx - exact).abs() / exact < 0.03,
                "{:?}: {} vs {}",
                solid.kind,
                approx,
                exact
            );
        }
    }

    #[test]
    fn test_scale_changes_volume_cubically() {
        let mut solid = cube(10.0);
        solid.placement = solid.placement.scaled(2.0);
        assert!((solid.volume().unwrap() - 8000.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_preserves_volume() {
        let mut solid = cube(10.0);
        solid.placement = solid.placement.rotated([30.0, 45.0, 60.0]);
        assert!((solid.volume().unwrap() - 1000.0).abs() < 1e-9);

        let mut mesh = Mesh::empty();
        solid.tessellate_into(&mut mesh);
        assert!((mesh_volume(&mesh) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_extrude_sits_on_sketch_plane() {
        let profile = Profile::new(ProfileKind::Rect {
            width: 4.0,
            depth: 2.0,
        });
        let solid = profile.extrude(6.0);
        assert_eq!(solid.placement.translation, [0.0, 0.0, 3.0]);
        assert!((solid.volume().unwrap() - 48.0).abs() < 1e-12);
        assert_eq!(profile.volume(), None);
    }
}
