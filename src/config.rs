use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "offer-renderer.toml";
pub const CONFIG_ENV_VAR: &str = "OFFER_RENDERER_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub convert: ConvertSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PathsSection {
    /// Root directory holding one folder per template.
    #[serde(default)]
    pub templates_root: Option<PathBuf>,
    /// Directory with product DOCX files (`<id>.docx`).
    #[serde(default)]
    pub products_root: Option<PathBuf>,
    /// Folder under `templates_root` that holds `templates.json`.
    ///
    /// Templates whose `folder` is `"."` live here too.
    #[serde(default)]
    pub index_dir: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ConvertSection {
    #[serde(default)]
    pub unoconvert: Option<String>,
    #[serde(default)]
    pub pdftoppm: Option<String>,
    #[serde(default)]
    pub pdftk: Option<String>,
    #[serde(default)]
    pub convert_timeout_secs: Option<u64>,
    #[serde(default)]
    pub preview_timeout_secs: Option<u64>,
    #[serde(default)]
    pub merge_timeout_secs: Option<u64>,
    /// Longest side of the first-page preview, in pixels.
    #[serde(default)]
    pub preview_scale: Option<u32>,
}

/// Config file values with defaults applied and paths made absolute.
#[derive(Clone, Debug)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub templates_root: PathBuf,
    pub products_root: PathBuf,
    pub index_dir: String,
    pub tools: ToolSettings,
}

#[derive(Clone, Debug)]
pub struct ToolSettings {
    pub unoconvert: String,
    pub pdftoppm: String,
    pub pdftk: String,
    pub convert_timeout: Duration,
    pub preview_timeout: Duration,
    pub merge_timeout: Duration,
    pub preview_scale: u32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            unoconvert: "unoconvert".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            pdftk: "pdftk".to_string(),
            convert_timeout: Duration::from_secs(30),
            preview_timeout: Duration::from_secs(15),
            merge_timeout: Duration::from_secs(60),
            preview_scale: 800,
        }
    }
}

impl Settings {
    /// Resolves settings from `--config`, the environment, or an upward search.
    ///
    /// Without any config file the built-in defaults relative to the current
    /// directory are used.
    pub fn discover(explicit: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg_file = explicit
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(find_default_config);
        match cfg_file {
            Some(p) if p.exists() => {
                let cfg = load_config(&p)?;
                Ok(Self::from_config(&cfg, Some(p)))
            }
            Some(p) => Err(anyhow::anyhow!("config not found: {}", p.display())),
            None => Ok(Self::from_config(&AppConfig::default(), None)),
        }
    }

    pub fn from_config(cfg: &AppConfig, config_path: Option<PathBuf>) -> Self {
        let base = config_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let resolve = |p: Option<&PathBuf>, default: &str| {
            let p = p.cloned().unwrap_or_else(|| PathBuf::from(default));
            if p.is_relative() {
                base.join(p)
            } else {
                p
            }
        };

        let defaults = ToolSettings::default();
        let c = &cfg.convert;
        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let tools = ToolSettings {
            unoconvert: c.unoconvert.clone().unwrap_or(defaults.unoconvert),
            pdftoppm: c.pdftoppm.clone().unwrap_or(defaults.pdftoppm),
            pdftk: c.pdftk.clone().unwrap_or(defaults.pdftk),
            convert_timeout: secs(c.convert_timeout_secs, defaults.convert_timeout),
            preview_timeout: secs(c.preview_timeout_secs, defaults.preview_timeout),
            merge_timeout: secs(c.merge_timeout_secs, defaults.merge_timeout),
            preview_scale: c.preview_scale.unwrap_or(defaults.preview_scale).max(1),
        };

        Self {
            templates_root: resolve(cfg.paths.templates_root.as_ref(), "templates"),
            products_root: resolve(cfg.paths.products_root.as_ref(), "products"),
            index_dir: cfg
                .paths
                .index_dir
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("oferta-podstawowa")
                .to_string(),
            config_path,
            tools,
        }
    }
}

pub fn find_default_config() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILE_NAME, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILE_NAME, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Err(anyhow::anyhow!(
            "config already exists: {} (use --force to overwrite)",
            cfg_path.display()
        ));
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"# offer-renderer configuration.
# Relative paths are resolved against the directory of this file.

[paths]
templates_root = "templates"
products_root = "products"
# Folder under templates_root holding templates.json
index_dir = "oferta-podstawowa"

[convert]
unoconvert = "unoconvert"
pdftoppm = "pdftoppm"
pdftk = "pdftk"
convert_timeout_secs = 30
preview_timeout_secs = 15
merge_timeout_secs = 60
preview_scale = 800
"#;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{init_default_config, load_config, AppConfig, Settings};

    #[test]
    fn default_file_parses_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init config");
        assert!(init_default_config(dir.path(), false).is_err());
        init_default_config(dir.path(), true).expect("force overwrite");

        let cfg = load_config(&path).expect("load");
        let s = Settings::from_config(&cfg, Some(path.clone()));
        assert_eq!(s.templates_root, dir.path().join("templates"));
        assert_eq!(s.products_root, dir.path().join("products"));
        assert_eq!(s.index_dir, "oferta-podstawowa");
        assert_eq!(s.tools.convert_timeout, Duration::from_secs(30));
        assert_eq!(s.tools.preview_scale, 800);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: AppConfig = toml::from_str(
            "[paths]\ntemplates_root = \"/srv/tpl\"\n[convert]\nmerge_timeout_secs = 5\n",
        )
        .expect("toml");
        let s = Settings::from_config(&cfg, Some("/etc/offer/offer-renderer.toml".into()));
        assert_eq!(s.templates_root, std::path::PathBuf::from("/srv/tpl"));
        assert_eq!(s.products_root, std::path::PathBuf::from("/etc/offer/products"));
        assert_eq!(s.tools.merge_timeout, Duration::from_secs(5));
        assert_eq!(s.tools.unoconvert, "unoconvert");
    }
}
