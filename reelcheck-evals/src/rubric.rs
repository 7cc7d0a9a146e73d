//! Rubrics and the builders that produce them.
//!
//! A rubric is opaque text. It is resolved once, when the request is built,
//! and backends only ever read it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A named rubric prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,
    pub prompt: String,
}

impl Rubric {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }

    /// Resolve a builder into a fixed rubric.
    pub fn from_builder(builder: &dyn RubricBuilder) -> Result<Self> {
        Ok(Self::new(builder.name(), builder.build()?))
    }
}

/// Produces rubric text for a given name.
pub trait RubricBuilder: Send + Sync {
    /// Key recorded in results and artifact file names.
    fn name(&self) -> &str;

    /// Produce the rubric text.
    fn build(&self) -> Result<String>;
}

/// Rubric text held in memory.
#[derive(Debug, Clone)]
pub struct InlineRubric {
    name: String,
    text: String,
}

impl InlineRubric {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl RubricBuilder for InlineRubric {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// Rubric text read from a file.
#[derive(Debug, Clone)]
pub struct FileRubric {
    name: String,
    path: PathBuf,
}

impl FileRubric {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RubricBuilder for FileRubric {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Result<String> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Rubric(format!("{}: {e}", self.path.display())))?;
        if text.trim().is_empty() {
            return Err(Error::Rubric(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(text)
    }
}

/// Resolves rubric names to files.
///
/// Explicit paths win; otherwise `<dir>/<name>.md` and then `<dir>/<name>.txt`.
#[derive(Debug, Clone, Default)]
pub struct RubricCatalog {
    dir: PathBuf,
    paths: HashMap<String, PathBuf>,
}

impl RubricCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: HashMap::new(),
        }
    }

    /// Map a name to an explicit file.
    pub fn with_path(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(name.into(), path.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file builder a name resolves to.
    pub fn builder(&self, name: &str) -> Result<FileRubric> {
        if let Some(path) = self.paths.get(name) {
            return Ok(FileRubric::new(name, path));
        }
        ["md", "txt"]
            .iter()
            .map(|ext| self.dir.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
            .map(|p| FileRubric::new(name, p))
            .ok_or_else(|| {
                Error::Rubric(format!(
                    "no rubric named '{name}' in {}",
                    self.dir.display()
                ))
            })
    }

    /// Resolve a name straight to a rubric.
    pub fn load(&self, name: &str) -> Result<Rubric> {
        Rubric::from_builder(&self.builder(name)?)
    }

    /// Names of rubric files in the catalog directory plus explicit entries.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.paths.keys().cloned().collect();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_rubric = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == "md" || e == "txt");
                if is_rubric && let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}
