use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const INDEX_FILE_NAME: &str = "templates.json";

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TemplateIndex {
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    #[default]
    SingleFile,
    MultiFile,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TemplateEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Folder under the templates root; `"."` means the index folder.
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(rename = "type", default)]
    pub kind: TemplateKind,
    #[serde(default)]
    pub main_file: Option<String>,
    #[serde(default)]
    pub files: Vec<TemplateFile>,
    /// Extra JSON (relative to the template folder) merged over this entry.
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub injection_point: Option<InjectionPoint>,
    /// Keys the service does not interpret (field lists, page descriptions, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TemplateFile {
    pub file: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Product documents are inserted in front of `before`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct InjectionPoint {
    pub before: String,
}

fn default_folder() -> String {
    ".".to_string()
}

struct CachedIndex {
    digest: String,
    index: TemplateIndex,
}

/// Owns the parsed `templates.json`.
///
/// The index is read on first use and kept until [`TemplateCatalog::invalidate`];
/// [`TemplateCatalog::refresh`] re-reads it only when the file content changed.
pub struct TemplateCatalog {
    templates_root: PathBuf,
    index_dir: String,
    cache: Option<CachedIndex>,
}

impl TemplateCatalog {
    pub fn new(templates_root: impl Into<PathBuf>, index_dir: impl Into<String>) -> Self {
        Self {
            templates_root: templates_root.into(),
            index_dir: index_dir.into(),
            cache: None,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.templates_root.join(&self.index_dir).join(INDEX_FILE_NAME)
    }

    pub fn index(&mut self) -> &TemplateIndex {
        let path = self.index_path();
        &self.cache.get_or_insert_with(|| load_index(&path)).index
    }

    /// Re-reads the index if its digest changed. Returns whether it was reloaded.
    pub fn refresh(&mut self) -> bool {
        let digest = std::fs::read(self.index_path())
            .map(|b| digest_hex(&b))
            .unwrap_or_default();
        if self.cache.as_ref().is_some_and(|c| c.digest == digest) {
            return false;
        }
        self.cache = Some(load_index(&self.index_path()));
        true
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Entry for `id`, with its `config_file` merged over it.
    pub fn template(&mut self, id: &str) -> anyhow::Result<TemplateEntry> {
        let entry = self
            .index()
            .templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("template not found: {id}"))?;
        let Some(config_file) = entry.config_file.as_deref() else {
            return Ok(entry);
        };

        let path = self.template_dir(&entry).join(config_file);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read template config: {}", path.display()))?;
        let detail: Map<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("parse template config: {}", path.display()))?;

        let mut merged = match serde_json::to_value(&entry).context("encode template entry")? {
            Value::Object(m) => m,
            _ => return Err(anyhow!("template entry is not an object: {id}")),
        };
        merged.extend(detail);
        serde_json::from_value(Value::Object(merged))
            .with_context(|| format!("merged template config: {id}"))
    }

    pub fn template_dir(&self, entry: &TemplateEntry) -> PathBuf {
        let folder = if entry.folder == "." || entry.folder.is_empty() {
            self.index_dir.as_str()
        } else {
            entry.folder.as_str()
        };
        self.templates_root.join(folder)
    }
}

fn load_index(path: &Path) -> CachedIndex {
    match read_index(path) {
        Ok((digest, index)) => {
            log::debug!("loaded {} template(s) from {}", index.templates.len(), path.display());
            CachedIndex { digest, index }
        }
        Err(err) => {
            log::warn!("template index unavailable: {err:#}");
            CachedIndex {
                digest: String::new(),
                index: TemplateIndex::default(),
            }
        }
    }
}

fn read_index(path: &Path) -> anyhow::Result<(String, TemplateIndex)> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let index: TemplateIndex =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok((digest_hex(&bytes), index))
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
