//! Versioned output directories for accepted programs
//!
//! Layout: `{output_dir}/{model}/{project}_v{n}/` holding the accepted script
//! and the exported STL. `n` is the first integer >= 1 whose directory does
//! not exist yet. Probing is not atomic across processes.

use std::path::PathBuf;

use crate::engine::EngineKind;

/// Error type for output store operations
#[derive(Debug)]
pub enum OutputError {
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for OutputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputError::Io { path, source } => write!(f, "IO error at {}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for OutputError {}

/// A created project directory
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectDir {
    pub path: PathBuf,
    pub project: String,
    pub version: u32,
}

impl ProjectDir {
    /// Where the accepted script for `engine` is saved
    pub fn script_path(&self, engine: EngineKind) -> PathBuf {
        self.path
            .join(format!("{}.{}", self.project, engine.script_extension()))
    }

    /// Where the exported geometry goes
    pub fn export_path(&self) -> PathBuf {
        self.path.join(format!("{}.stl", self.project))
    }
}

pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the next free `{project}_v{n}` directory under `{root}/{model}`
    pub fn create_project_dir(&self, model: &str, project: &str) -> Result<ProjectDir, OutputError> {
        let model_dir = self.root.join(sanitize(model));
        let project = sanitize(project);

        let mut version = 1;
        loop {
            let path = model_dir.join(format!("{}_v{}", project, version));
            if !path.exists() {
                std::fs::create_dir_all(&path).map_err(|source| OutputError::Io {
                    path: path.clone(),
                    source,
                })?;
                return Ok(ProjectDir {
                    path,
                    project,
                    version,
                });
            }
            version += 1;
        }
    }

    /// Save `code` with a header comment naming the model and prompt
    pub fn save_script(
        &self,
        dir: &ProjectDir,
        engine: EngineKind,
        model: &str,
        prompt: &str,
        code: &str,
    ) -> Result<PathBuf, OutputError> {
        let path = dir.script_path(engine);
        let mut contents = String::new();
        contents.push_str(&format!("# Model: {}\n", model));
        for line in prompt.lines() {
            contents.push_str(&format!("# Prompt: {}\n", line));
        }
        contents.push('\n');
        contents.push_str(code);
        if !code.ends_with('\n') {
            contents.push('\n');
        }

        std::fs::write(&path, contents).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Keep names usable as a single path component
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
