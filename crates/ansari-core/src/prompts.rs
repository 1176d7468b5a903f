//! Versioned prompt templates with keyword substitution and hot-reload.
//!
//! Templates live in a directory as `<name>.v<N>.txt` files; the highest
//! version per name wins. `{{key}}` placeholders are substituted at render
//! time. A filesystem watcher can re-scan the directory on change so prompt
//! edits take effect without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::error::{AnsariError, Result};

#[derive(Debug, Clone)]
struct Template {
    version: u32,
    body: String,
}

/// In-memory template set, shared behind a lock so the watcher can swap it.
#[derive(Clone)]
pub struct PromptStore {
    dir: PathBuf,
    templates: Arc<RwLock<HashMap<String, Template>>>,
}

impl PromptStore {
    /// Load all templates from `dir`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let templates = scan_dir(&dir)?;
        info!(dir = %dir.display(), count = templates.len(), "Loaded prompt templates");
        Ok(Self {
            dir,
            templates: Arc::new(RwLock::new(templates)),
        })
    }

    /// Render a template by name, substituting `{{key}}` placeholders.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let template = templates
            .get(name)
            .ok_or_else(|| AnsariError::Prompt(format!("unknown template: {name}")))?;
        let mut out = template.body.clone();
        for (key, value) in vars {
            out = out.replace(&format!("{{{{{key}}}}}"), value);
        }
        Ok(out)
    }

    /// Version of the template currently loaded for `name`.
    pub fn version(&self, name: &str) -> Option<u32> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        templates.get(name).map(|t| t.version)
    }

    /// Re-scan the template directory now.
    pub fn reload(&self) -> Result<()> {
        let fresh = scan_dir(&self.dir)?;
        let mut guard = self
            .templates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = fresh;
        Ok(())
    }

    /// Start watching the template directory, re-scanning on change.
    /// The returned watcher must be kept alive for reloads to fire.
    pub fn watch(&self) -> Result<PromptWatcher> {
        let store = self.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            debug!("Prompt directory changed, reloading templates");
                            if let Err(e) = store.reload() {
                                error!(%e, "Failed to reload prompt templates");
                            } else {
                                info!("Prompt templates reloaded");
                            }
                        }
                    }
                    Err(e) => error!(%e, "Prompt directory watch error"),
                }
            })
            .map_err(|e| AnsariError::Prompt(e.to_string()))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| AnsariError::Prompt(e.to_string()))?;
        info!(dir = %self.dir.display(), "Prompt template watcher started");

        Ok(PromptWatcher { _watcher: watcher })
    }
}

/// Keeps the notify watcher alive.
pub struct PromptWatcher {
    _watcher: notify::RecommendedWatcher,
}

fn scan_dir(dir: &Path) -> Result<HashMap<String, Template>> {
    let mut templates: HashMap<String, Template> = HashMap::new();
    if !dir.exists() {
        warn!(dir = %dir.display(), "Prompt directory does not exist");
        return Ok(templates);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let (name, version) = split_versioned_name(stem);
        let body = std::fs::read_to_string(&path)?;

        match templates.get(name) {
            Some(existing) if existing.version >= version => {}
            _ => {
                templates.insert(name.to_string(), Template { version, body });
            }
        }
    }

    Ok(templates)
}

/// Split `system_msg.v3` into `("system_msg", 3)`; an unversioned stem is
/// version 0.
fn split_versioned_name(stem: &str) -> (&str, u32) {
    if let Some((name, suffix)) = stem.rsplit_once(".v") {
        if let Ok(version) = suffix.parse::<u32>() {
            return (name, version);
        }
    }
    (stem, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_name_split() {
        assert_eq!(split_versioned_name("system_msg.v3"), ("system_msg", 3));
        assert_eq!(split_versioned_name("system_msg"), ("system_msg", 0));
        assert_eq!(split_versioned_name("weird.vx"), ("weird.vx", 0));
    }

    #[test]
    fn test_highest_version_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("greeting.v1.txt"), "Salam, {{name}}!").unwrap();
        std::fs::write(dir.path().join("greeting.v2.txt"), "Assalamu alaykum, {{name}}!")
            .unwrap();

        let store = PromptStore::load(dir.path()).unwrap();
        assert_eq!(store.version("greeting"), Some(2));
        let rendered = store.render("greeting", &[("name", "Fatima")]).unwrap();
        assert_eq!(rendered, "Assalamu alaykum, Fatima!");
    }

    #[test]
    fn test_unknown_template_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::load(dir.path()).unwrap();
        assert!(store.render("missing", &[]).is_err());
    }

    #[test]
    fn test_manual_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sys.txt"), "old").unwrap();
        let store = PromptStore::load(dir.path()).unwrap();
        assert_eq!(store.render("sys", &[]).unwrap(), "old");

        std::fs::write(dir.path().join("sys.txt"), "new").unwrap();
        store.reload().unwrap();
        assert_eq!(store.render("sys", &[]).unwrap(), "new");
    }
}
