//! Persisted settings.
//!
//! The engine never reaches for a process-wide config; callers pass a
//! [`ConfigStore`] and read a typed [`PatchSettings`] view from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cleanup::ExclusionRules;
use crate::codepage::{Codepage, DEFAULT_CODEPAGE, sort_codepages};
use crate::error::{Error, Result};

/// Sectioned key-value store
pub trait ConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<Value>;

    fn set(&mut self, section: &str, key: &str, value: Value);

    /// Persist pending changes. In-memory stores do nothing.
    fn save(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    root: Map<String, Value>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<Value> {
        section_get(&self.root, section, key)
    }

    fn set(&mut self, section: &str, key: &str, value: Value) {
        section_set(&mut self.root, section, key, value);
    }
}

/// JSON file backed store
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
    root: Map<String, Value>,
}

impl JsonConfigStore {
    /// Default location: `<config dir>/exepatch/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("exepatch").join("config.json"))
    }

    /// Open a store, starting empty when the file does not exist yet
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = match fs::read_to_string(&path).map_err(Error::from) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.is_not_found() => {
                debug!("Config file {} not found, starting empty", path.display());
                Map::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self { path, root })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, section: &str, key: &str) -> Option<Value> {
        section_get(&self.root, section, key)
    }

    fn set(&mut self, section: &str, key: &str, value: Value) {
        section_set(&mut self.root, section, key, value);
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.root)?;
        fs::write(&self.path, content)?;
        info!("Saved config to {}", self.path.display());
        Ok(())
    }
}

fn section_get(root: &Map<String, Value>, section: &str, key: &str) -> Option<Value> {
    root.get(section)?.as_object()?.get(key).cloned()
}

fn section_set(root: &mut Map<String, Value>, section: &str, key: &str, value: Value) {
    let entry = root
        .entry(section.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(map) = entry {
        map.insert(key.to_string(), value);
    }
}

/// Typed view of the `patch_executable` section
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSettings {
    pub exclusions: ExclusionRules,
    pub language_codepages: BTreeMap<String, String>,
    pub last_encoding: Option<String>,
    pub add_leading_trailing_spaces: bool,
    pub debug_output: bool,
    pub executable: Option<PathBuf>,
    pub translation_file: Option<PathBuf>,
}

impl Default for PatchSettings {
    fn default() -> Self {
        Self {
            exclusions: default_exclusions(),
            language_codepages: BTreeMap::new(),
            last_encoding: None,
            add_leading_trailing_spaces: true,
            debug_output: false,
            executable: None,
            translation_file: None,
        }
    }
}

fn default_exclusions() -> ExclusionRules {
    let mut rules = ExclusionRules::new();
    rules.add("ru", "Histories of ");
    rules
}

impl PatchSettings {
    pub const SECTION: &'static str = "patch_executable";

    /// Read settings, falling back to defaults for missing or malformed keys
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();

        let exclusions = read_key::<BTreeMap<String, Vec<String>>>(store, "fix_space_exclusions")
            .map(ExclusionRules::from_map)
            .unwrap_or(defaults.exclusions);

        Self {
            exclusions,
            language_codepages: read_key(store, "language_codepages")
                .unwrap_or(defaults.language_codepages),
            last_encoding: read_key(store, "last_encoding"),
            add_leading_trailing_spaces: read_key(store, "add_leading_trailing_spaces")
                .unwrap_or(defaults.add_leading_trailing_spaces),
            debug_output: read_key(store, "debug_output").unwrap_or(defaults.debug_output),
            executable: read_key(store, "executable"),
            translation_file: read_key(store, "translation_file"),
        }
    }

    pub fn store(&self, store: &mut dyn ConfigStore) {
        write_key(store, "fix_space_exclusions", &self.exclusions.to_map());
        write_key(store, "language_codepages", &self.language_codepages);
        write_key(store, "last_encoding", &self.last_encoding);
        write_key(store, "add_leading_trailing_spaces", &self.add_leading_trailing_spaces);
        write_key(store, "debug_output", &self.debug_output);
        write_key(store, "executable", &self.executable);
        write_key(store, "translation_file", &self.translation_file);
    }

    /// Pick the codepage to patch with.
    ///
    /// Order: remembered codepage for the language, last used codepage if it
    /// is still feasible, first feasible codepage in numeric order, `cp437`.
    pub fn choose_codepage(&self, language: Option<&str>, feasible: &[Codepage]) -> String {
        if let Some(remembered) = language.and_then(|lang| self.language_codepages.get(lang)) {
            return remembered.clone();
        }

        if let Some(last) = &self.last_encoding
            && feasible.iter().any(|cp| cp.name() == last)
        {
            return last.clone();
        }

        let mut sorted = feasible.to_vec();
        sort_codepages(&mut sorted);
        sorted
            .first()
            .map(|cp| cp.name().to_string())
            .unwrap_or_else(|| DEFAULT_CODEPAGE.to_string())
    }

    pub fn remember_codepage(&mut self, language: Option<&str>, codepage: &str) {
        self.last_encoding = Some(codepage.to_string());
        if let Some(lang) = language {
            self.language_codepages
                .insert(lang.to_string(), codepage.to_string());
        }
    }
}

fn read_key<T: DeserializeOwned>(store: &dyn ConfigStore, key: &str) -> Option<T> {
    let value = store.get(PatchSettings::SECTION, key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring malformed config value '{}': {}", key, e);
            None
        }
    }
}

fn write_key<T: Serialize>(store: &mut dyn ConfigStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set(PatchSettings::SECTION, key, v),
        Err(e) => warn!("Failed to serialize config value '{}': {}", key, e),
    }
}
