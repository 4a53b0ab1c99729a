//! Definition sources.
//!
//! The resolver never reads storage itself; it asks one or more
//! [`DefinitionSource`]s for already-decoded definition records.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{DefinitionSpec, MockHttpConfig};
use crate::error::{MockError, Result};

/// Anything that can produce definition records.
pub trait DefinitionSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Produce every record, in declaration order.
    fn load(&self) -> Result<Vec<DefinitionSpec>>;
}

/// Definitions held in memory, for tests and inline configuration.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    definitions: Vec<DefinitionSpec>,
}

impl InMemorySource {
    pub fn new(definitions: Vec<DefinitionSpec>) -> Self {
        Self { definitions }
    }
}

impl DefinitionSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self) -> Result<Vec<DefinitionSpec>> {
        Ok(self.definitions.clone())
    }
}

/// A directory of YAML files, one definition per file.
///
/// Only `*.yaml` and `*.yml` files directly inside the directory are read,
/// in file name order.
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let name = format!("file:{}", dir.display());
        if !dir.is_dir() {
            return Err(MockError::Source {
                source_name: name,
                message: "not a directory".to_string(),
            });
        }
        Ok(Self { name, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn error(&self, message: String) -> MockError {
        MockError::Source {
            source_name: self.name.clone(),
            message,
        }
    }

    fn definition_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.error(e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| self.error(e.to_string()))?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if path.is_file() && is_yaml {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DefinitionSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Vec<DefinitionSpec>> {
        let mut definitions = Vec::new();
        for path in self.definition_files()? {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| self.error(format!("{}: {}", path.display(), e)))?;
            let definition: DefinitionSpec = serde_yaml::from_str(&content)
                .map_err(|e| self.error(format!("{}: {}", path.display(), e)))?;
            debug!(file = %path.display(), path = %definition.path, "Read definition file");
            definitions.push(definition);
        }
        Ok(definitions)
    }
}

/// Sources described by a configuration: one per definition directory,
/// followed by the inline definitions.
pub fn config_sources(config: &MockHttpConfig) -> Result<Vec<Box<dyn DefinitionSource>>> {
    let mut sources: Vec<Box<dyn DefinitionSource>> = Vec::new();
    for dir in &config.definition_dirs {
        sources.push(Box::new(FileSource::new(dir)?));
    }
    if !config.definitions.is_empty() {
        sources.push(Box::new(InMemorySource::new(config.definitions.clone())));
    }
    Ok(sources)
}
