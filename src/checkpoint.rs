use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::error::{Result, SearchError};
use crate::frontier::SearchOrder;
use crate::search::{SearchReport, SearchState};

pub const DEFAULT_CHECKPOINT_DIR: &str = "data/checkpoints";
const CHECKPOINT_VERSION: u32 = 1;
const LATEST_FILE: &str = "latest.json";

/// On-disk search state. Both collections are listed best-first.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub version: u32,
    pub id: String,
    pub created_at_unix_ms: u128,
    pub order: SearchOrder,
    pub frontier: Vec<Candidate>,
    pub accepted: Vec<Candidate>,
    #[serde(default)]
    pub report: SearchReport,
}

#[derive(Clone, Debug)]
pub struct SavedCheckpoint {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub path: PathBuf,
    pub created_at_unix_ms: u128,
    pub frontier_len: usize,
    pub accepted_len: usize,
    pub best_open_score: Option<f32>,
    pub best_accepted_score: Option<f32>,
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

fn ensure_checkpoint_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| SearchError::io(dir, err))
}

fn sanitize_checkpoint_label(label: &str) -> String {
    let mut cleaned = String::new();
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            cleaned.push(ch);
        } else if ch.is_ascii_whitespace() {
            cleaned.push('-');
        }
    }
    cleaned.trim_matches('-').to_string()
}

pub fn checkpoint_file_from_id(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

fn write_checkpoint_file(path: &Path, checkpoint: &CheckpointFile) -> Result<()> {
    let payload = serde_json::to_vec_pretty(checkpoint)?;
    fs::write(path, payload).map_err(|err| SearchError::io(path, err))
}

pub fn read_checkpoint_file(path: &Path) -> Result<CheckpointFile> {
    if !path.exists() {
        return Err(SearchError::CheckpointNotFound(path.to_path_buf()));
    }
    let payload = fs::read(path).map_err(|err| SearchError::io(path, err))?;
    Ok(serde_json::from_slice::<CheckpointFile>(&payload)?)
}

/// Writes `qwop-{unix_ms}[-{label}].json` and refreshes `latest.json`.
pub fn save_checkpoint(
    dir: &Path,
    state: &SearchState,
    report: &SearchReport,
    label: Option<&str>,
) -> Result<SavedCheckpoint> {
    ensure_checkpoint_dir(dir)?;
    let timestamp = now_unix_ms();
    let label_suffix = label
        .map(sanitize_checkpoint_label)
        .filter(|value| !value.is_empty())
        .map(|value| format!("-{value}"))
        .unwrap_or_default();
    let base_id = format!("qwop-{timestamp}{label_suffix}");
    let mut id = base_id.clone();
    let mut attempt = 1;
    while checkpoint_file_from_id(dir, &id).exists() {
        id = format!("{base_id}-{attempt}");
        attempt += 1;
    }
    let path = checkpoint_file_from_id(dir, &id);

    let checkpoint = CheckpointFile {
        version: CHECKPOINT_VERSION,
        id: id.clone(),
        created_at_unix_ms: timestamp,
        order: state.frontier.order(),
        frontier: state.frontier.to_vec(),
        accepted: state.accepted.to_vec(),
        report: report.clone(),
    };
    write_checkpoint_file(&path, &checkpoint)?;
    write_checkpoint_file(&dir.join(LATEST_FILE), &checkpoint)?;
    Ok(SavedCheckpoint { id, path })
}

/// Loads checkpoint `id` from `dir`, or `latest.json` when no id is given.
pub fn load_checkpoint(dir: &Path, id: Option<&str>) -> Result<CheckpointFile> {
    let path = match id {
        Some(requested_id) => checkpoint_file_from_id(dir, requested_id),
        None => dir.join(LATEST_FILE),
    };
    read_checkpoint_file(&path)
}

/// Newest first; `latest.json` and unreadable files are skipped.
pub fn list_checkpoints(dir: &Path) -> Result<Vec<CheckpointSummary>> {
    ensure_checkpoint_dir(dir)?;
    let entries = fs::read_dir(dir).map_err(|err| SearchError::io(dir, err))?;
    let mut summaries = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SearchError::io(dir, err))?;
        let path = entry.path();
        let is_json = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if !is_json {
            continue;
        }
        if path.file_name().and_then(|v| v.to_str()) == Some(LATEST_FILE) {
            continue;
        }
        if let Ok(file) = read_checkpoint_file(&path) {
            summaries.push(CheckpointSummary {
                id: file.id,
                path: path.clone(),
                created_at_unix_ms: file.created_at_unix_ms,
                frontier_len: file.frontier.len(),
                accepted_len: file.accepted.len(),
                best_open_score: file.frontier.first().map(Candidate::score),
                best_accepted_score: file.accepted.first().map(Candidate::score),
            });
        }
    }
    summaries.sort_by(|a, b| {
        b.created_at_unix_ms
            .cmp(&a.created_at_unix_ms)
            .then_with(|| b.id.cmp(&a.id))
    });
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize_checkpoint_label("final run!"), "final-run");
        assert_eq!(sanitize_checkpoint_label("  ../etc "), "etc");
        assert_eq!(sanitize_checkpoint_label("periodic_2"), "periodic_2");
    }

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_checkpoint(dir.path(), Some("nope")).unwrap_err();
        assert!(matches!(err, SearchError::CheckpointNotFound(_)));
    }

    #[test]
    fn listing_skips_latest_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let state = SearchState::empty(&Default::default());
        let report = SearchReport::default();
        let first = save_checkpoint(dir.path(), &state, &report, Some("a")).unwrap();
        let second = save_checkpoint(dir.path(), &state, &report, Some("a")).unwrap();
        assert_ne!(first.id, second.id);
        fs::write(dir.path().join("notes.json"), b"{ not json").unwrap();
        fs::write(dir.path().join("readme.txt"), b"hello").unwrap();

        let summaries = list_checkpoints(dir.path()).unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|summary| summary.frontier_len == 0));
        assert!(dir.path().join(LATEST_FILE).exists());
    }
}
