use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// One rendered video in `videos.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub subreddit: String,
    pub id: String,
    /// Unix seconds at which the render finished.
    pub time: String,
    pub background_credit: String,
    pub reddit_title: String,
    pub filename: String,
}

impl VideoRecord {
    pub fn now(
        subreddit: &str,
        filename: &str,
        reddit_title: &str,
        id: &str,
        background_credit: &str,
    ) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            subreddit: subreddit.to_string(),
            id: id.to_string(),
            time: time.to_string(),
            background_credit: background_credit.to_string(),
            reddit_title: reddit_title.to_string(),
            filename: filename.to_string(),
        }
    }
}

pub trait MetadataStore {
    /// Whether a video was already rendered for thread `id`.
    fn already_done(&self, id: &str) -> PipelineResult<bool>;

    fn save(&self, record: VideoRecord) -> PipelineResult<()>;
}

/// `videos.json`: a JSON list of [`VideoRecord`]s, created on first use.
#[derive(Debug, Clone)]
pub struct JsonVideoStore {
    path: PathBuf,
}

impl JsonVideoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> PipelineResult<Vec<VideoRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&data)
            .map_err(|e| PipelineError::metadata(format!("{}: {e}", self.path.display())))
    }

    fn write(&self, records: &[VideoRecord]) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(records)
            .map_err(|e| PipelineError::metadata(e.to_string()))?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

impl MetadataStore for JsonVideoStore {
    fn already_done(&self, id: &str) -> PipelineResult<bool> {
        Ok(self.load()?.iter().any(|record| record.id == id))
    }

    fn save(&self, record: VideoRecord) -> PipelineResult<()> {
        let mut records = self.load()?;
        if records.iter().any(|r| r.id == record.id) {
            debug!(id = %record.id, "video already recorded");
            return Ok(());
        }
        info!("Recording video {} in {}", record.filename, self.path.display());
        records.push(record);
        self.write(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> VideoRecord {
        VideoRecord::now("AskReddit", "What is it.mp4", "What is it?", id, "bbswitzer")
    }

    #[test]
    fn missing_file_means_nothing_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVideoStore::new(dir.path().join("data").join("videos.json"));
        assert!(!store.already_done("abc").unwrap());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn saved_records_are_found_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVideoStore::new(dir.path().join("data").join("videos.json"));
        store.save(record("abc")).unwrap();
        store.save(record("def")).unwrap();
        store.save(record("abc")).unwrap();

        assert!(store.already_done("abc").unwrap());
        assert!(!store.already_done("xyz").unwrap());
        let records = store.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].background_credit, "bbswitzer");
        assert!(records[0].time.parse::<u64>().unwrap() > 0);
    }

    #[test]
    fn file_uses_the_documented_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonVideoStore::new(dir.path().join("videos.json"));
        store.save(record("abc")).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let keys: Vec<_> = raw[0].as_object().unwrap().keys().cloned().collect();
        for key in ["subreddit", "id", "time", "background_credit", "reddit_title", "filename"] {
            assert!(keys.iter().any(|k| k == key), "missing {key}");
        }
    }

    #[test]
    fn corrupt_file_is_a_metadata_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonVideoStore::new(&path).already_done("abc").unwrap_err();
        assert!(matches!(err, PipelineError::Metadata(_)));
    }
}
