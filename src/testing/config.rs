//! Test script selection
//!
//! Scripts come from three places: every `*.rhai` file in the script
//! directory, names given on the command line, or a YAML suite file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

/// File extension of test scripts
pub const SCRIPT_EXTENSION: &str = "rhai";

/// An ordered list of scripts loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestSuite {
    /// Name of the suite
    pub name: String,
    /// Optional description of what the suite covers
    pub description: Option<String>,
    /// Script names, resolved against the script directory
    pub scripts: Vec<String>,
}

impl TestSuite {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read test suite '{}': {}",
                path.display(),
                e
            ))
        })?;

        let suite: TestSuite = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse test suite: {}", e)))?;

        if suite.scripts.is_empty() {
            return Err(Error::Config(format!(
                "Test suite '{}' lists no scripts",
                suite.name
            )));
        }
        Ok(suite)
    }

    /// Resolve every listed script against `script_dir`
    pub fn sources(&self, script_dir: &Path) -> Vec<ScriptSource> {
        self.scripts
            .iter()
            .map(|name| resolve_script(script_dir, name))
            .collect()
    }
}

/// One script selected for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// Name shown in banners and the report
    pub name: String,
    pub path: PathBuf,
}

/// Map a script name to its file
///
/// Absolute paths and names containing a directory separator are used as
/// given. Bare names are looked up in `script_dir`. A `.rhai` extension is
/// appended unless the name already ends in one. The file need not exist
/// yet; a missing script is reported when the run reaches it.
pub fn resolve_script(script_dir: &Path, name: &str) -> ScriptSource {
    let given = Path::new(name);
    let mut path = if given.is_absolute() || given.components().count() > 1 {
        given.to_path_buf()
    } else {
        script_dir.join(given)
    };
    if path.extension().map_or(true, |ext| ext != SCRIPT_EXTENSION) {
        // Append rather than replace, so "smoke.v2" keeps its dotted stem
        let mut file = path.into_os_string();
        file.push(".");
        file.push(SCRIPT_EXTENSION);
        path = PathBuf::from(file);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    ScriptSource { name, path }
}

/// Every `*.rhai` file directly inside `script_dir`, sorted by file name
pub fn discover_scripts(script_dir: &Path) -> Result<Vec<ScriptSource>> {
    let entries = std::fs::read_dir(script_dir).map_err(|e| Error::file_read(script_dir, e))?;

    let mut scripts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_script = path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == SCRIPT_EXTENSION);
        if !is_script {
            continue;
        }
        if let Some(name) = path.file_name() {
            scripts.push(ScriptSource {
                name: name.to_string_lossy().into_owned(),
                path,
            });
        }
    }

    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}
