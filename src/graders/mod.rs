// src/graders/mod.rs

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::{ModuleError, ModuleResult};
use crate::protocol::GraderModule;
use crate::session::SessionSettings;

pub mod suite;

pub use suite::SuiteGrader;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_./-]+$").expect("reference pattern is valid"));

/// Resolves a grader reference from a submission payload into something
/// runnable. Every call builds a fresh value.
pub trait GraderLoader: Send + Sync {
    fn load_module(&self, reference: &str) -> ModuleResult<Box<dyn GraderModule>>;

    fn load_session(&self, reference: &str) -> ModuleResult<SessionSettings>;
}

/// Loads TOML grader definitions from a directory tree.
#[derive(Debug, Clone)]
pub struct FsGraderLoader {
    root: PathBuf,
}

impl FsGraderLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, reference: &str) -> ModuleResult<PathBuf> {
        if !REFERENCE.is_match(reference) {
            return Err(ModuleError::Definition(format!(
                "illegal grader reference '{}'",
                reference
            )));
        }
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ModuleError::Definition(format!(
                "grader reference '{}' leaves the grader root",
                reference
            )));
        }
        Ok(self.root.join(relative))
    }

    fn read(&self, reference: &str) -> ModuleResult<(PathBuf, String)> {
        let path = self.resolve(reference)?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ModuleError::Definition(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok((path, text))
    }
}

impl GraderLoader for FsGraderLoader {
    fn load_module(&self, reference: &str) -> ModuleResult<Box<dyn GraderModule>> {
        let (path, text) = self.read(reference)?;
        let workdir = path.parent().unwrap_or(&self.root).to_path_buf();
        let grader = SuiteGrader::from_toml(reference, &text, workdir)?;
        Ok(Box::new(grader))
    }

    fn load_session(&self, reference: &str) -> ModuleResult<SessionSettings> {
        let (_, text) = self.read(reference)?;
        let settings: SessionSettings =
            toml::from_str(&text).map_err(|e| ModuleError::Definition(e.to_string()))?;
        settings.validate().map_err(ModuleError::Definition)?;
        Ok(settings)
    }
}
