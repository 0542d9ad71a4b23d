//! Embedded engine - evaluates generated programs in-process
//!
//! Each evaluation runs in a fresh, private scope: no binding survives from
//! one attempt to the next, and the program can only reach the modeling
//! built-ins listed in `BUILTINS`. The language has no loops, so evaluation
//! always terminates; the body budget bounds how much geometry one program
//! may create.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::script::{
    parse_program_with_depth, BinaryOp, Expr, Program, ScriptError, Statement, DEFAULT_MAX_DEPTH,
};
use super::{EngineFailure, ERROR_EXCERPT_CHARS};
use crate::geometry::stl::{read_stl, write_stl, StlError};
use crate::geometry::{
    analyze_geometry, has_positive_volume, Artifact, Body, GeometryStats, Placement, Profile,
    ProfileKind, Solid, SolidKind,
};

/// Name of the binding a program must assign its final shape to
pub const RESULT_BINDING: &str = "result";

const BUILTINS: &[&str] = &[
    "box", "cylinder", "sphere", "cone", "torus", "rect", "circle", "extrude", "translate",
    "rotate", "scale", "compound", "array", "empty", "sqrt", "abs", "min", "max",
];

/// Resource ceilings for one in-process evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedLimits {
    /// Maximum number of bodies a program may create
    pub max_bodies: usize,
    /// Maximum accepted source size in bytes
    pub max_source_bytes: usize,
    /// Maximum expression nesting accepted by the parser
    pub max_depth: usize,
}

impl Default for EmbeddedLimits {
    fn default() -> Self {
        Self {
            max_bodies: 10_000,
            max_source_bytes: 256 * 1024,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A runtime value inside the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Shape(Artifact),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Shape(_) => "shape",
        }
    }
}

/// In-process execution engine
#[derive(Debug, Clone, Default)]
pub struct EmbeddedEngine {
    limits: EmbeddedLimits,
}

impl EmbeddedEngine {
    pub fn new(limits: EmbeddedLimits) -> Self {
        Self { limits }
    }

    /// Evaluate `source` in a fresh scope and return the `result` binding
    pub fn evaluate(&self, source: &str) -> Result<Artifact, EngineFailure> {
        if source.len() > self.limits.max_source_bytes {
            return Err(EngineFailure::Exec(format!(
                "program is {} bytes, limit is {}",
                source.len(),
                self.limits.max_source_bytes
            )));
        }

        let program = parse_program_with_depth(source, self.limits.max_depth)
            .map_err(|e| EngineFailure::Exec(e.to_string()))?;
        let mut scope = Interpreter::new(&self.limits)
            .run(&program)
            .map_err(|e| EngineFailure::Exec(e.to_string()))?;

        match scope.remove(RESULT_BINDING) {
            Some(Value::Shape(artifact)) => Ok(artifact),
            Some(Value::Number(value)) => Err(EngineFailure::Exec(format!(
                "'{}' is a number ({}), expected a shape",
                RESULT_BINDING, value
            ))),
            None => Err(EngineFailure::NoResultVar),
        }
    }

    /// Quick pass/fail check: no metrics, no export
    pub fn test(&self, source: &str) -> Result<(), EngineFailure> {
        let artifact = self
            .evaluate(source)
            .map_err(|failure| failure.truncated(ERROR_EXCERPT_CHARS))?;
        if has_positive_volume(&artifact) {
            Ok(())
        } else {
            Err(EngineFailure::EmptyGeometry)
        }
    }

    /// Full run: evaluate, compute metrics and export the artifact as STL
    pub fn execute(&self, source: &str, export_path: &Path) -> Result<GeometryStats, EngineFailure> {
        let artifact = self.evaluate(source)?;
        let stats = analyze_geometry(&artifact);
        if !stats.is_valid() {
            return Err(EngineFailure::EmptyGeometry);
        }

        let name = export_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("result");
        write_stl(export_path, &artifact.to_mesh(), name)
            .map_err(|e| EngineFailure::Exec(format!("export to {} failed: {}", export_path.display(), e)))?;

        debug!(
            path = %export_path.display(),
            volume = stats.volume,
            faces = stats.face_count,
            "artifact exported"
        );
        Ok(stats)
    }

    /// Import an interchange file into the embedded object model
    pub fn import(&self, path: &Path) -> Result<Artifact, StlError> {
        read_stl(path).map(Artifact::Mesh)
    }
}

struct Interpreter<'a> {
    limits: &'a EmbeddedLimits,
    scope: BTreeMap<String, Value>,
    bodies_created: usize,
}

impl<'a> Interpreter<'a> {
    fn new(limits: &'a EmbeddedLimits) -> Self {
        Self {
            limits,
            scope: BTreeMap::new(),
            bodies_created: 0,
        }
    }

    fn run(mut self, program: &Program) -> Result<BTreeMap<String, Value>, ScriptError> {
        for statement in &program.statements {
            match statement {
                Statement::Assign { name, expr } => {
                    let value = self.eval(expr)?;
                    self.scope.insert(name.clone(), value);
                }
                Statement::Expr(expr) => {
                    self.eval(expr)?;
                }
            }
        }
        Ok(self.scope)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Number(value) => Ok(Value::Number(*value)),
            Expr::Variable { name, line, column } => match self.scope.get(name) {
                Some(value) => Ok(value.clone()),
                None if name == "pi" => Ok(Value::Number(std::f64::consts::PI)),
                None => Err(ScriptError::at(
                    format!("undefined variable '{}'", name),
                    *line,
                    *column,
                )),
            },
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Number(value) => Ok(Value::Number(-value)),
                Value::Shape(_) => Err(ScriptError::new("cannot negate a shape")),
            },
            Expr::Binary { lhs, op, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                    return Err(ScriptError::new(format!(
                        "arithmetic needs numbers, found {} and {}; combine shapes with compound(...)",
                        lhs.type_name(),
                        rhs.type_name()
                    )));
                };
                let value = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => {
                        if *b == 0.0 {
                            return Err(ScriptError::new("division by zero"));
                        }
                        a / b
                    }
                };
                Ok(Value::Number(value))
            }
            Expr::Call {
                name,
                args,
                line,
                column,
            } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = self
                    .call(name, values)
                    .map_err(|message| ScriptError::at(message, *line, *column))?;
                if let Value::Shape(artifact) = &value {
                    self.charge(artifact.body_count())
                        .map_err(|message| ScriptError::at(message, *line, *column))?;
                }
                Ok(value)
            }
        }
    }

    fn charge(&mut self, bodies: usize) -> Result<(), String> {
        self.bodies_created += bodies;
        if self.bodies_created > self.limits.max_bodies {
            Err(format!(
                "body budget exceeded ({} bodies, limit {})",
                self.bodies_created, self.limits.max_bodies
            ))
        } else {
            Ok(())
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        let mut args = Args::new(name, args);
        let value = match name {
            "box" => {
                args.expect_len(3, "width, depth, height")?;
                solid(SolidKind::Box {
                    width: args.dimension(0, "width")?,
                    depth: args.dimension(1, "depth")?,
                    height: args.dimension(2, "height")?,
                })
            }
            "cylinder" => {
                args.expect_len(2, "radius, height")?;
                solid(SolidKind::Cylinder {
                    radius: args.dimension(0, "radius")?,
                    height: args.dimension(1, "height")?,
                })
            }
            "sphere" => {
                args.expect_len(1, "radius")?;
                solid(SolidKind::Sphere {
                    radius: args.dimension(0, "radius")?,
                })
            }
            "cone" => {
                args.expect_len(3, "radius1, radius2, height")?;
                solid(SolidKind::Cone {
                    radius1: args.dimension(0, "radius1")?,
                    radius2: args.dimension(1, "radius2")?,
                    height: args.dimension(2, "height")?,
                })
            }
            "torus" => {
                args.expect_len(2, "major_radius, minor_radius")?;
                let major_radius = args.dimension(0, "major_radius")?;
                let minor_radius = args.dimension(1, "minor_radius")?;
                if minor_radius > major_radius {
                    return Err(format!(
                        "torus: minor_radius {} exceeds major_radius {}",
                        minor_radius, major_radius
                    ));
                }
                solid(SolidKind::Torus {
                    major_radius,
                    minor_radius,
                })
            }
            "rect" => {
                args.expect_len(2, "width, depth")?;
                profile(ProfileKind::Rect {
                    width: args.dimension(0, "width")?,
                    depth: args.dimension(1, "depth")?,
                })
            }
            "circle" => {
                args.expect_len(1, "radius")?;
                profile(ProfileKind::Circle {
                    radius: args.dimension(0, "radius")?,
                })
            }
            "extrude" => {
                args.expect_len(2, "profile, height")?;
                let height = args.dimension(1, "height")?;
                let bodies = args.shape(0)?.into_bodies_checked(name)?;
                let extruded = bodies
                    .into_iter()
                    .map(|body| match body {
                        Body::Profile(profile) => Ok(Body::Solid(profile.extrude(height))),
                        Body::Solid(_) => Err("extrude: expected a profile (rect or circle), found a solid".to_string()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Shape(rebuild(extruded))
            }
            "translate" => {
                args.expect_len(4, "shape, x, y, z")?;
                let offset = [args.number(1)?, args.number(2)?, args.number(3)?];
                transform(args.shape(0)?, name, |p| p.translated(offset))?
            }
            "rotate" => {
                args.expect_len(4, "shape, x_deg, y_deg, z_deg")?;
                let angles = [args.number(1)?, args.number(2)?, args.number(3)?];
                transform(args.shape(0)?, name, |p| p.rotated(angles))?
            }
            "scale" => {
                args.expect_len(2, "shape, factor")?;
                let factor = args.dimension(1, "factor")?;
                transform(args.shape(0)?, name, |p| p.scaled(factor))?
            }
            "compound" => {
                if args.len() == 0 {
                    return Err("compound: expected at least one shape".to_string());
                }
                let mut bodies = Vec::new();
                for index in 0..args.len() {
                    bodies.extend(args.shape(index)?.into_bodies_checked(name)?);
                }
                Value::Shape(Artifact::Compound(bodies))
            }
            "array" => {
                args.expect_len(5, "shape, count, dx, dy, dz")?;
                let count = args.count(1)?;
                let step = [args.number(2)?, args.number(3)?, args.number(4)?];
                if count.saturating_mul(args.shape_ref(0)?.body_count()) > self.limits.max_bodies {
                    return Err(format!(
                        "array: {} copies exceed the body budget of {}",
                        count, self.limits.max_bodies
                    ));
                }
                let bodies = args.shape(0)?.into_bodies_checked(name)?;
                let mut out = Vec::with_capacity(bodies.len() * count);
                for k in 0..count {
                    let offset = step.map(|d| d * k as f64);
                    out.extend(
                        bodies
                            .iter()
                            .map(|body| body.map_placement(|p| p.translated(offset))),
                    );
                }
                Value::Shape(Artifact::Compound(out))
            }
            "empty" => {
                args.expect_len(0, "")?;
                Value::Shape(Artifact::Compound(Vec::new()))
            }
            "sqrt" => {
                args.expect_len(1, "x")?;
                let x = args.number(0)?;
                if x < 0.0 {
                    return Err(format!("sqrt: negative argument {}", x));
                }
                Value::Number(x.sqrt())
            }
            "abs" => {
                args.expect_len(1, "x")?;
                Value::Number(args.number(0)?.abs())
            }
            "min" | "max" => {
                if args.len() == 0 {
                    return Err(format!("{}: expected at least one number", name));
                }
                let numbers = (0..args.len())
                    .map(|index| args.number(index))
                    .collect::<Result<Vec<_>, _>>()?;
                let picked = if name == "min" {
                    numbers.into_iter().fold(f64::INFINITY, f64::min)
                } else {
                    numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)
                };
                Value::Number(picked)
            }
            unknown => {
                return Err(match suggest_name(unknown) {
                    Some(candidate) => format!(
                        "unknown function '{}' (did you mean '{}'?)",
                        unknown, candidate
                    ),
                    None => format!("unknown function '{}'", unknown),
                })
            }
        };
        Ok(value)
    }
}

/// Positional argument accessor with uniform error messages
struct Args<'n> {
    function: &'n str,
    values: Vec<Option<Value>>,
}

impl<'n> Args<'n> {
    fn new(function: &'n str, values: Vec<Value>) -> Self {
        Self {
            function,
            values: values.into_iter().map(Some).collect(),
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn expect_len(&self, expected: usize, signature: &str) -> Result<(), String> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "{}({}) takes {} argument(s), got {}",
                self.function,
                signature,
                expected,
                self.values.len()
            ))
        }
    }

    fn number(&self, index: usize) -> Result<f64, String> {
        match &self.values[index] {
            Some(Value::Number(value)) if value.is_finite() => Ok(*value),
            Some(Value::Number(value)) => Err(format!(
                "{}: argument {} is not finite ({})",
                self.function,
                index + 1,
                value
            )),
            Some(other) => Err(format!(
                "{}: argument {} must be a number, found {}",
                self.function,
                index + 1,
                other.type_name()
            )),
            None => Err(format!("{}: argument {} already used", self.function, index + 1)),
        }
    }

    /// A number that must not be negative; zero is allowed and yields empty geometry
    fn dimension(&self, index: usize, label: &str) -> Result<f64, String> {
        let value = self.number(index)?;
        if value < 0.0 {
            Err(format!(
                "{}: {} must be non-negative, got {}",
                self.function, label, value
            ))
        } else {
            Ok(value)
        }
    }

    fn count(&self, index: usize) -> Result<usize, String> {
        let value = self.number(index)?;
        if value < 1.0 || value.fract() != 0.0 {
            Err(format!(
                "{}: count must be a positive integer, got {}",
                self.function, value
            ))
        } else {
            Ok(value as usize)
        }
    }

    fn shape_ref(&self, index: usize) -> Result<&Artifact, String> {
        match &self.values[index] {
            Some(Value::Shape(artifact)) => Ok(artifact),
            Some(other) => Err(format!(
                "{}: argument {} must be a shape, found {}",
                self.function,
                index + 1,
                other.type_name()
            )),
            None => Err(format!("{}: argument {} already used", self.function, index + 1)),
        }
    }

    fn shape(&mut self, index: usize) -> Result<Artifact, String> {
        self.shape_ref(index)?;
        match self.values[index].take() {
            Some(Value::Shape(artifact)) => Ok(artifact),
            _ => Err(format!("{}: argument {} already used", self.function, index + 1)),
        }
    }
}

trait IntoBodiesChecked {
    fn into_bodies_checked(self, function: &str) -> Result<Vec<Body>, String>;
}

impl IntoBodiesChecked for Artifact {
    fn into_bodies_checked(self, function: &str) -> Result<Vec<Body>, String> {
        match self {
            Artifact::Mesh(_) => Err(format!("{}: imported meshes cannot be modified", function)),
            other => Ok(other.into_bodies()),
        }
    }
}

fn solid(kind: SolidKind) -> Value {
    Value::Shape(Artifact::Single(Body::Solid(Solid::new(kind))))
}

fn profile(kind: ProfileKind) -> Value {
    Value::Shape(Artifact::Single(Body::Profile(Profile::new(kind))))
}

fn rebuild(mut bodies: Vec<Body>) -> Artifact {
    if bodies.len() == 1 {
        Artifact::Single(bodies.remove(0))
    } else {
        Artifact::Compound(bodies)
    }
}

fn transform(
    artifact: Artifact,
    function: &str,
    f: impl Fn(Placement) -> Placement,
) -> Result<Value, String> {
    let single = matches!(artifact, Artifact::Single(_));
    let bodies = artifact
        .into_bodies_checked(function)?
        .into_iter()
        .map(|body| body.map_placement(&f))
        .collect::<Vec<_>>();
    Ok(Value::Shape(if single {
        rebuild(bodies)
    } else {
        Artifact::Compound(bodies)
    }))
}

fn suggest_name(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .map(|candidate| (levenshtein(name, candidate), *candidate))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        previous = current;
    }
    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> EmbeddedEngine {
        EmbeddedEngine::default()
    }

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cadbench-embedded-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_valid_program_passes() {
        assert!(engine().test("result = box(10, 10, 10)").is_ok());
    }

    #[test]
    fn test_missing_result_binding() {
        let source = "base = box(10, 10, 10)\npeg = cylinder(2, 5)\nrsult = compound(base, peg)";
        assert_eq!(engine().test(source), Err(EngineFailure::NoResultVar));
    }

    #[test]
    fn test_zero_volume_is_empty_geometry() {
        assert_eq!(
            engine().test("result = box(10, 0, 10)"),
            Err(EngineFailure::EmptyGeometry)
        );
        assert_eq!(engine().test("result = empty()"), Err(EngineFailure::EmptyGeometry));
        assert_eq!(engine().test("result = rect(10, 10)"), Err(EngineFailure::EmptyGeometry));
    }

    #[test]
    fn test_evaluation_errors_are_exec_errors() {
        let cases = [
            "result = box(10, 10)",
            "result = box(-1, 10, 10)",
            "result = box(10, 10, 10) + 1",
            "result = cylnder(2, 5)",
            "result = box(size, 1, 1)",
            "result = box(1 / 0, 1, 1)",
            "result = 42",
        ];
        for source in cases {
            match engine().test(source) {
                Err(EngineFailure::Exec(_)) => {}
                other => panic!("{}: expected exec error, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_unknown_function_suggests_builtin() {
        let Err(EngineFailure::Exec(message)) = engine().evaluate("result = cylnder(2, 5)") else {
            panic!("expected exec error");
        };
        assert!(message.contains("did you mean 'cylinder'"), "{}", message);
    }

    #[test]
    fn test_scope_is_fresh_per_evaluation() {
        let engine = engine();
        assert!(engine.test("result = box(1, 1, 1)").is_ok());
        assert_eq!(engine.test("other = box(1, 1, 1)"), Err(EngineFailure::NoResultVar));
    }

    #[test]
    fn test_compound_and_array_aggregate() {
        let artifact = engine()
            .evaluate("cube = box(10, 10, 10)\nresult = array(cube, 2, 20, 0, 0)")
            .unwrap();
        let stats = analyze_geometry(&artifact);
        assert!((stats.volume - 2000.0).abs() < 1e-9);
        assert_eq!(stats.face_count, 12);
    }

    #[test]
    fn test_extrude_and_pipe() {
        let source = "plate = rect(20, 10) |> extrude(2)\nresult = plate |> rotate(0, 0, 90) |> translate(5, 5, 0)";
        let stats = analyze_geometry(&engine().evaluate(source).unwrap());
        assert!((stats.volume - 400.0).abs() < 1e-9);
        assert_eq!(stats.face_count, 6);
    }

    #[test]
    fn test_body_budget() {
        let engine = EmbeddedEngine::new(EmbeddedLimits {
            max_bodies: 10,
            ..EmbeddedLimits::default()
        });
        let Err(EngineFailure::Exec(message)) =
            engine.evaluate("result = array(box(1, 1, 1), 50, 2, 0, 0)")
        else {
            panic!("expected exec error");
        };
        assert!(message.contains("body budget"), "{}", message);
    }

    #[test]
    fn test_source_size_limit() {
        let engine = EmbeddedEngine::new(EmbeddedLimits {
            max_source_bytes: 16,
            ..EmbeddedLimits::default()
        });
        assert!(matches!(
            engine.test("result = box(10, 10, 10)"),
            Err(EngineFailure::Exec(_))
        ));
    }

    #[test]
    fn test_deep_nesting_is_exec_error() {
        let signs = format!("result = box({}1, 1, 1)", "-".repeat(200_000));
        let groups = format!("result = box({}1{}, 1, 1)", "(".repeat(100_000), ")".repeat(100_000));
        for source in [signs, groups] {
            match engine().test(&source) {
                Err(EngineFailure::Exec(message)) => {
                    assert!(message.contains("nested deeper"), "{}", message)
                }
                other => panic!("expected exec error, got {:?}", other),
            }
        }

        let shallow = EmbeddedEngine::new(EmbeddedLimits {
            max_depth: 4,
            ..EmbeddedLimits::default()
        });
        assert!(shallow.test("result = box(((1)), 1, 1)").is_ok());
        assert!(shallow.test("result = box(((((1)))), 1, 1)").is_err());
    }

    #[test]
    fn test_overflowing_volume_fails_in_both_modes() {
        let source = format!(
            "x = 1{}
d = x * x * x * x
result = box(d, d, d)",
            "0".repeat(30)
        );
        assert_eq!(engine().test(&source), Err(EngineFailure::EmptyGeometry));

        let dir = temp_dir();
        assert_eq!(
            engine().execute(&source, &dir.join("huge.stl")),
            Err(EngineFailure::EmptyGeometry)
        );
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_execute_exports_and_imports() {
        let dir = temp_dir();
        let path = dir.join("part.stl");
        let engine = engine();

        let stats = engine
            .execute("result = compound(box(10, 10, 10), translate(box(10, 10, 10), 30, 0, 0))", &path)
            .unwrap();
        assert!((stats.volume - 2000.0).abs() < 1e-9);
        assert_eq!(stats.face_count, 12);
        assert!(path.exists());

        let imported = engine.import(&path).unwrap();
        let reimported = analyze_geometry(&imported);
        assert!((reimported.volume - 2000.0).abs() < 1e-6);
        assert_eq!(reimported.face_count, 12);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_execute_does_not_export_empty_geometry() {
        let dir = temp_dir();
        let path = dir.join("empty.stl");
        assert_eq!(
            engine().execute("result = sphere(0)", &path),
            Err(EngineFailure::EmptyGeometry)
        );
        assert!(!path.exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("box", "box"), 0);
        assert_eq!(levenshtein("bx", "box"), 1);
        assert_eq!(levenshtein("sphree", "sphere"), 2);
    }
}
