use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::block::BlockPos;
use crate::paste::{PasteOptions, Rotation, DEFAULT_ORIGIN};

/// Settings for the schematic subsystem (the `schematics` section of the
/// lobby configuration)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchematicsConfig {
    /// Master switch; when false nothing is loaded or pasted
    pub enabled: bool,
    /// When false the cache is pass-through regardless of `cache_max_size`
    pub cache_enabled: bool,
    /// Maximum number of cached structures
    pub cache_max_size: i64,
    /// Decode and paste on background workers
    pub async_operations: bool,
    /// Paste every enabled entry when the lobby starts
    pub paste_on_startup: bool,
    /// Configured structures, in paste order
    pub files: Vec<StructureEntry>,
}

/// One configured structure as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureEntry {
    pub name: Option<String>,
    pub enabled: bool,
    /// Path to the schematic, relative paths resolve against the data folder
    pub file: Option<PathBuf>,
    pub origin: Option<[i32; 3]>,
    /// Clockwise degrees: 0, 90, 180 or 270
    pub rotation: i32,
    pub mirror: bool,
    pub paste_air: bool,
}

/// A validated entry ready to load and paste
#[derive(Debug, Clone, PartialEq)]
pub struct StructureSpec {
    pub name: String,
    pub file: PathBuf,
    pub options: PasteOptions,
}

/// Problems with individual config values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("structure entry #{0} has no name")]
    MissingName(usize),

    #[error("no file path specified for structure '{0}'")]
    MissingFile(String),

    #[error("structure '{name}' has invalid rotation {degrees} (expected 0, 90, 180 or 270)")]
    InvalidRotation { name: String, degrees: i32 },

    #[error("structure '{0}' is configured more than once")]
    DuplicateName(String),

    #[error("cache_max_size must not be negative (got {0})")]
    InvalidCacheSize(i64),
}

impl Default for SchematicsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_enabled: true,
            cache_max_size: 10,
            async_operations: true,
            paste_on_startup: false,
            files: Vec::new(),
        }
    }
}

impl Default for StructureEntry {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            file: None,
            origin: None,
            rotation: 0,
            mirror: false,
            paste_air: false,
        }
    }
}

impl SchematicsConfig {
    /// Load from a TOML or JSON file (chosen by extension).
    ///
    /// The file may either hold these settings at the top level or inside a
    /// `schematics` table, as in the full lobby configuration.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            let mut document: serde_json::Value = serde_json::from_str(&content)?;
            let section = match document.get_mut("schematics") {
                Some(section) => section.take(),
                None => document,
            };
            Ok(serde_json::from_value(section)?)
        } else {
            Self::from_toml_str(&content)
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut document: toml::Table = toml::from_str(content)?;
        let config = match document.remove("schematics") {
            Some(section) => section.try_into()?,
            None => toml::Value::Table(document).try_into()?,
        };
        Ok(config)
    }

    /// Cache capacity after applying `cache_enabled`; zero means pass-through
    pub fn effective_cache_size(&self) -> Result<usize, ConfigError> {
        if self.cache_max_size < 0 {
            return Err(ConfigError::InvalidCacheSize(self.cache_max_size));
        }
        if !self.cache_enabled {
            return Ok(0);
        }
        Ok(self.cache_max_size as usize)
    }

    /// Validate every entry in declared order, disabled ones included.
    ///
    /// Each item carries the entry's own outcome so one bad entry never hides
    /// the rest.
    pub fn entries(&self) -> Vec<(bool, Result<StructureSpec, ConfigError>)> {
        let mut seen = std::collections::HashSet::new();
        self.files
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let spec = entry.validate(index, self.async_operations).and_then(|spec| {
                    if seen.insert(spec.name.clone()) {
                        Ok(spec)
                    } else {
                        Err(ConfigError::DuplicateName(spec.name))
                    }
                });
                (entry.enabled, spec)
            })
            .collect()
    }

    /// Look up an entry by name
    pub fn entry(&self, name: &str) -> Option<&StructureEntry> {
        self.files.iter().find(|e| e.name.as_deref() == Some(name))
    }
}

impl StructureEntry {
    pub fn validate(&self, index: usize, run_async: bool) -> Result<StructureSpec, ConfigError> {
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or(ConfigError::MissingName(index))?;
        let file = self
            .file
            .clone()
            .ok_or_else(|| ConfigError::MissingFile(name.clone()))?;
        let rotation = Rotation::from_degrees(self.rotation).ok_or_else(|| {
            ConfigError::InvalidRotation {
                name: name.clone(),
                degrees: self.rotation,
            }
        })?;

        Ok(StructureSpec {
            name,
            file,
            options: PasteOptions {
                origin: self.origin.map(BlockPos::from).unwrap_or(DEFAULT_ORIGIN),
                rotation,
                mirror: self.mirror,
                paste_air: self.paste_air,
                run_async,
            },
        })
    }
}

impl StructureSpec {
    /// Absolute paths are kept, relative ones are joined onto `data_dir`
    pub fn resolve_file(&self, data_dir: &Path) -> PathBuf {
        if self.file.is_absolute() {
            self.file.clone()
        } else {
            data_dir.join(&self.file)
        }
    }
}
