//! Playbook store: versioned artifact directory plus history logs
//!
//! Layout under the root:
//!
//! ```text
//! VERSION
//! modules/
//! prompts/
//! config/pipeline.json
//! config/vocabularies/
//! analysis_reports/reflection_{version}_{YYYYmmdd_HHMMSS}.json
//! changesets/changeset_v{N}_to_v{N+1}_{YYYYmmdd_HHMMSS}.json
//! .locks/
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::locking::{LockConfig, PathLockManager};
use crate::pipeline::{PIPELINE_CONFIG_PATH, PipelineConfig};

use super::version::{VERSION_FILE, VersionManager};

pub const MODULES_DIR: &str = "modules";
pub const PROMPTS_DIR: &str = "prompts";
pub const CONFIG_DIR: &str = "config";
pub const VOCABULARIES_DIR: &str = "config/vocabularies";
pub const REPORTS_DIR: &str = "analysis_reports";
pub const CHANGESETS_DIR: &str = "changesets";
pub const LOCKS_DIR: &str = ".locks";

/// Largest collision suffix tried before giving up on a history name
const MAX_HISTORY_SUFFIX: u32 = 100;

/// Current artifact paths by category, relative to the playbook root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookSnapshot {
    pub modules: Vec<String>,
    pub prompts: Vec<String>,
    pub configs: Vec<String>,
    pub vocabularies: Vec<String>,
}

impl PlaybookSnapshot {
    pub fn total(&self) -> usize {
        self.modules.len() + self.prompts.len() + self.configs.len() + self.vocabularies.len()
    }
}

/// A persisted changeset in the history log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetRecord {
    pub path: PathBuf,
    pub source_version: u32,
    pub target_version: u32,
}

/// Owns every artifact file of one playbook
#[derive(Debug, Clone)]
pub struct PlaybookStore {
    root: PathBuf,
    locks: PathLockManager,
}

impl PlaybookStore {
    /// Open an initialized playbook
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(VERSION_FILE).is_file() {
            return Err(Error::PlaybookNotInitialized(root.display().to_string()));
        }
        Ok(Self::unchecked(root))
    }

    /// Create the layout, seeding the pipeline configuration and VERSION when absent
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [MODULES_DIR, PROMPTS_DIR, CONFIG_DIR, VOCABULARIES_DIR, REPORTS_DIR, CHANGESETS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let store = Self::unchecked(root);

        if !store.exists(PIPELINE_CONFIG_PATH) {
            store.write_artifact(PIPELINE_CONFIG_PATH, &PipelineConfig::builtin().to_json()?)?;
        }
        if !store.root.join(VERSION_FILE).exists() {
            store.write_artifact(VERSION_FILE, "1\n")?;
        }

        info!(root = %store.root.display(), "Playbook initialized");
        Ok(store)
    }

    fn unchecked(root: PathBuf) -> Self {
        let locks = PathLockManager::new(LockConfig::default().with_lock_dir(root.join(LOCKS_DIR)));
        Self { root, locks }
    }

    /// Override how long artifact locks are waited for
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        let config = self.locks.config().clone().with_timeout(timeout);
        self.locks = PathLockManager::new(config);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    pub fn versions(&self) -> VersionManager {
        VersionManager::new(self.clone())
    }

    /// Map a playbook-relative path to an absolute one
    ///
    /// Absolute paths and `..` components are rejected with [`Error::PathEscape`].
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if relative.trim().is_empty() {
            return Err(Error::PathEscape(relative.to_string()));
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::PathEscape(relative.to_string())),
            }
        }
        Ok(self.root.join(path))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read_artifact(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::ArtifactNotFound(relative.to_string()),
            _ => Error::Io(e),
        })
    }

    /// Replace an artifact atomically (temp file in the same directory, then rename)
    pub fn write_artifact(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        write_atomic(&path, contents.as_bytes())?;
        debug!(path = %relative, bytes = contents.len(), "Artifact written");
        Ok(path)
    }

    /// Enumerate artifacts by category as sorted relative paths
    pub fn snapshot(&self) -> Result<PlaybookSnapshot> {
        let vocab_root = self.root.join(VOCABULARIES_DIR);

        let modules = self.relative_files(MODULES_DIR, |_| true)?;
        let prompts = self.relative_files(PROMPTS_DIR, |p| has_extension(p, "txt"))?;
        let configs = self.relative_files(CONFIG_DIR, |p| {
            has_extension(p, "json") && !p.starts_with(&vocab_root)
        })?;
        let vocabularies = self.relative_files(VOCABULARIES_DIR, |_| true)?;

        Ok(PlaybookSnapshot {
            modules,
            prompts,
            configs,
            vocabularies,
        })
    }

    fn relative_files<F>(&self, dir: &str, keep: F) -> Result<Vec<String>>
    where
        F: Fn(&Path) -> bool,
    {
        let mut files = Vec::new();
        walk_files(&self.root.join(dir), &mut files)?;

        let mut relative: Vec<String> = files
            .into_iter()
            .filter(|p| keep(p))
            .filter_map(|p| {
                p.strip_prefix(&self.root)
                    .ok()
                    .map(|r| r.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/"))
            })
            .collect();
        relative.sort();
        Ok(relative)
    }

    /// Active pipeline configuration
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::from_json(&self.read_artifact(PIPELINE_CONFIG_PATH)?)
    }

    /// Load `prompts/{name}_{version}.txt`, falling back to the highest `_v*` version
    pub fn load_prompt(&self, name: &str, version: &str) -> Result<String> {
        let exact = format!("{}/{}_{}.txt", PROMPTS_DIR, name, version);
        if self.exists(&exact) {
            return self.read_artifact(&exact);
        }

        let prefix = format!("{}/{}_v", PROMPTS_DIR, name);
        let latest = self
            .snapshot()?
            .prompts
            .into_iter()
            .filter_map(|p| {
                let tag = p.strip_prefix(&prefix)?.strip_suffix(".txt")?;
                let key = version_key(tag)?;
                Some((key, p))
            })
            .max_by(|a, b| a.0.cmp(&b.0));

        match latest {
            Some((_, path)) => {
                debug!(prompt = %name, requested = %version, using = %path, "Prompt version fallback");
                self.read_artifact(&path)
            }
            None => Err(Error::ArtifactNotFound(exact)),
        }
    }

    /// Persist an analysis report (write-once)
    pub fn save_report<T: Serialize>(&self, extraction_version: &str, report: &T) -> Result<PathBuf> {
        let stem = format!(
            "reflection_{}_{}",
            sanitize_component(extraction_version),
            timestamp()
        );
        let path = self.write_history(REPORTS_DIR, &stem, report)?;
        info!(path = %path.display(), "Analysis report saved");
        Ok(path)
    }

    /// Persist a changeset (write-once)
    pub fn save_changeset<T: Serialize>(&self, source_version: u32, changeset: &T) -> Result<PathBuf> {
        let stem = format!(
            "changeset_v{}_to_v{}_{}",
            source_version,
            source_version + 1,
            timestamp()
        );
        let path = self.write_history(CHANGESETS_DIR, &stem, changeset)?;
        info!(path = %path.display(), "Changeset saved");
        Ok(path)
    }

    fn write_history<T: Serialize>(&self, dir: &str, stem: &str, value: &T) -> Result<PathBuf> {
        let body = serde_json::to_string_pretty(value)?;
        let dir = self.root.join(dir);
        fs::create_dir_all(&dir)?;

        for n in 1..=MAX_HISTORY_SUFFIX {
            let name = if n == 1 {
                format!("{}.json", stem)
            } else {
                format!("{}_{}.json", stem, n)
            };
            let path = dir.join(name);
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    file.sync_all()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::HistoryExists(stem.to_string()))
    }

    /// The newest `n` analysis reports, newest first
    ///
    /// Unreadable report files are skipped with a warning.
    pub fn recent_reports(&self, n: usize) -> Result<Vec<serde_json::Value>> {
        let mut entries = self.history_entries(REPORTS_DIR, "reflection_")?;
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut reports = Vec::new();
        for (_, path) in entries.into_iter() {
            if reports.len() >= n {
                break;
            }
            match fs::read_to_string(&path).map(|s| serde_json::from_str::<serde_json::Value>(&s)) {
                Ok(Ok(value)) => reports.push(value),
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Skipping unreadable report"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable report"),
            }
        }
        Ok(reports)
    }

    /// Changeset history in total order (source version, then timestamp)
    pub fn list_changesets(&self) -> Result<Vec<ChangesetRecord>> {
        let mut records: Vec<(u32, HistoryKey, ChangesetRecord)> = self
            .history_entries(CHANGESETS_DIR, "changeset_v")?
            .into_iter()
            .filter_map(|(key, path)| {
                let (source_version, target_version) = parse_changeset_versions(&path)?;
                Some((
                    source_version,
                    key,
                    ChangesetRecord {
                        path,
                        source_version,
                        target_version,
                    },
                ))
            })
            .collect();

        records.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(records.into_iter().map(|(_, _, r)| r).collect())
    }

    fn history_entries(&self, dir: &str, prefix: &str) -> Result<Vec<(HistoryKey, PathBuf)>> {
        let dir = self.root.join(dir);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(prefix) || !name.ends_with(".json") {
                continue;
            }
            if let Some(key) = history_key(name) {
                entries.push((key, path));
            }
        }
        Ok(entries)
    }
}

/// (date, time, collision suffix) parsed from a history file name
type HistoryKey = (String, String, u32);

fn history_key(file_name: &str) -> Option<HistoryKey> {
    let stem = file_name.strip_suffix(".json")?;
    let tokens: Vec<&str> = stem.split('_').collect();
    let mut end = tokens.len();

    let mut suffix = 1;
    let last = tokens.last()?;
    if last.len() < 6 && last.chars().all(|c| c.is_ascii_digit()) {
        suffix = last.parse().ok()?;
        end -= 1;
    }
    if end < 2 {
        return None;
    }

    let time = tokens[end - 1];
    let date = tokens[end - 2];
    let is_digits = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_digit());
    if !is_digits(date, 8) || !is_digits(time, 6) {
        return None;
    }
    Some((date.to_string(), time.to_string(), suffix))
}

fn parse_changeset_versions(path: &Path) -> Option<(u32, u32)> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("changeset_v")?;
    let (source, rest) = rest.split_once("_to_v")?;
    let target = rest.split('_').next()?;
    Some((source.parse().ok()?, target.parse().ok()?))
}

/// Numeric ordering key for a prompt version tag such as `v7` or `v14_3_2`
fn version_key(tag: &str) -> Option<Vec<u32>> {
    tag.split(['_', '.'])
        .map(|part| part.parse::<u32>().ok())
        .collect()
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() { "unknown".to_string() } else { cleaned }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map(|e| e == ext).unwrap_or(false)
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
