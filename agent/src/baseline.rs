use common::EventRecord;
use std::path::{Path, PathBuf};
use tokio::fs;
use crate::error::CycleResult;


/// Snapshot of the most recent successful poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Baseline { pub records: Vec<EventRecord> }

impl Baseline {
    /// Id of the first persisted record. Only meaningful while upstream
    /// keeps returning records sorted descending by id.
    pub fn watermark_id(&self) -> i64 {
        self.records.first().map(|r| r.id).unwrap_or(0)
    }
}


#[derive(Clone, Debug)]
pub struct BaselineStore { path: PathBuf }


impl BaselineStore {
pub fn new(path: impl Into<PathBuf>) -> Self {
Self { path: path.into() }
}

pub fn path(&self) -> &Path {
    &self.path
}

/// Returns `Ok(None)` when nothing has been saved yet.
pub async fn load(&self) -> CycleResult<Option<Baseline>> {
    let content = match fs::read(&self.path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let records: Vec<EventRecord> = serde_json::from_slice(&content)?;
    Ok(Some(Baseline { records }))
}

/// Overwrite the snapshot with `records`, written through a sibling temp file.
pub async fn save(&self, records: &[EventRecord]) -> CycleResult<()> {
    let json = serde_json::to_vec_pretty(records)?;
    let mut tmp = self.path.clone().into_os_string();
    tmp.push(".tmp");
    fs::write(&tmp, json).await?;
    fs::rename(&tmp, &self.path).await?;
    Ok(())
}
}
