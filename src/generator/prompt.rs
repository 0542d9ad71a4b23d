//! Prompt text and reply cleanup

/// System prompt describing both target languages
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert CAD engineer. Convert the user's request into an executable 3D model script.
You may choose between two targets.

1. CadScript (preferred) for standard mechanical parts, brackets and plates.
   One statement per line, `name = expression`. Units: mm (default), cm, m, deg.
   Solids (centred on the origin): box(width, depth, height), cylinder(radius, height),
   sphere(radius), cone(radius1, radius2, height), torus(major_radius, minor_radius)
   Profiles: rect(width, depth), circle(radius); extrude(profile, height)
   Placement: translate(shape, x, y, z), rotate(shape, x_deg, y_deg, z_deg), scale(shape, factor)
   Grouping: compound(a, b, ...), array(shape, count, dx, dy, dz)
   Math: sqrt, min, max, abs, pi. Pipes: `rect(20, 10) |> extrude(5)`
   Example:
     plate = box(80, 40, 5)
     boss = cylinder(6, 10) |> translate(0, 0, 7.5)
     result = compound(plate, boss)

2. FreeCAD, only when explicitly requested or for operations CadScript cannot express.
   import FreeCAD, Part
   doc = FreeCAD.newDocument()
   box = Part.makeBox(10, 10, 10)
   doc.addObject("Part::Feature", "MyBox").Shape = box
   The last object added to the active document is exported.

RULES:
- Never mix the two targets.
- With CadScript, assign the final shape to a variable named `result`.
- Reply with code only: no introduction, no explanation, no markdown fences."#;

/// Build the retry prompt from the task, the last code and its failure
pub fn compose_corrective_prompt(task: &str, prior_code: &str, prior_error: &str) -> String {
    format!(
        "{task}\n\n\
         The previous attempt failed.\n\n\
         PREVIOUS CODE:\n{prior_code}\n\n\
         ERROR:\n{prior_error}\n\n\
         Fix the error and rewrite the entire program. Reply with code only."
    )
}

/// Remove markdown code fences and surrounding whitespace from a model reply
pub fn strip_code_fences(reply: &str) -> String {
    reply
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrective_prompt_carries_code_and_error_verbatim() {
        let code = "result = box(10, 10, 0)";
        let error = "geometry volume is zero";
        let prompt = compose_corrective_prompt("make a cube", code, error);
        assert!(prompt.starts_with("make a cube"));
        assert!(prompt.contains(code));
        assert!(prompt.contains(error));
        assert!(prompt.contains("rewrite the entire program"));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```python\nimport FreeCAD\n```\n"),
            "import FreeCAD"
        );
        assert_eq!(strip_code_fences("  result = box(1, 1, 1)  "), "result = box(1, 1, 1)");
        assert_eq!(strip_code_fences("```\n```"), "");
    }
}
