use crate::config::ScriptEntry;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// An allow-listed script with its program resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedScript {
    pub name: String,
    /// Path as written in the config
    pub path: String,
    /// Program actually launched
    #[serde(skip)]
    pub program: PathBuf,
    pub description: String,
    pub functions: Vec<String>,
    #[serde(skip)]
    pub working_dir: Option<PathBuf>,
}

impl AllowedScript {
    fn from_entry(entry: &ScriptEntry) -> Self {
        Self {
            name: entry.name.clone(),
            path: entry.path.clone(),
            program: resolve_program(&entry.path),
            description: entry.description.clone(),
            functions: entry.functions.clone(),
            working_dir: entry.working_dir.clone(),
        }
    }

    pub fn allows_function(&self, function: &str) -> bool {
        self.functions.iter().any(|f| f == function)
    }
}

/// Bare program names are looked up on PATH; anything with a separator is
/// taken as written.
fn resolve_program(path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.components().count() > 1 {
        return candidate.to_path_buf();
    }
    match which::which(path) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(program = %path, error = %e, "Allow-listed program not found on PATH");
            candidate.to_path_buf()
        }
    }
}

/// The set of scripts clients may run
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    scripts: Vec<AllowedScript>,
}

impl AllowList {
    pub fn new(entries: &[ScriptEntry]) -> Self {
        Self {
            scripts: entries.iter().map(AllowedScript::from_entry).collect(),
        }
    }

    /// Look a request path up by script name, configured path, or resolved program
    pub fn resolve(&self, requested: &str) -> Option<&AllowedScript> {
        let requested = requested.trim();
        self.scripts.iter().find(|script| {
            script.name == requested
                || script.path == requested
                || script.program.as_os_str() == requested
        })
    }

    pub fn scripts(&self) -> &[AllowedScript] {
        &self.scripts
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
