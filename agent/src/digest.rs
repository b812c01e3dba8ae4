//! Change detection against the persisted baseline and digest rendering.

use chrono::{DateTime, Utc};
use common::EventRecord;
use log::{debug, error, info};
use crate::baseline::BaselineStore;
use crate::error::CycleResult;

const SUBJECT_PREFIX: &str = "New 42 Events Detected";
const BLOCK_DIVIDER: &str = "\n===========================================\n";

#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub new_records: usize,
}

pub struct DigestEngine {
    store: BaselineStore,
    profile_url: String,
}

impl DigestEngine {
    pub fn new(store: BaselineStore, profile_url: String) -> Self {
        Self { store, profile_url }
    }

    /// Compare `fresh` with the last baseline and render a digest of what is new.
    ///
    /// An empty fetch leaves the baseline untouched and yields no digest. Any
    /// other fetch replaces the baseline and yields a digest, even one that
    /// counts zero new records.
    pub async fn compute_digest(&self, fresh: &[EventRecord]) -> CycleResult<Option<Digest>> {
        if fresh.is_empty() {
            debug!("Empty fetch, baseline left untouched");
            return Ok(None);
        }

        let baseline = match self.store.load().await {
            Ok(b) => b,
            Err(e) => {
                error!("Error loading last results from {}: {}", self.store.path().display(), e);
                None
            }
        };
        let watermark = baseline.map(|b| b.watermark_id()).unwrap_or(0);

        let new_records: Vec<&EventRecord> = fresh.iter().filter(|r| r.id > watermark).collect();

        self.store.save(fresh).await?;

        info!("{} new event(s) above watermark {}", new_records.len(), watermark);
        Ok(Some(Digest {
            subject: subject_line(new_records.len()),
            body: format!("New events detected:\n\n{}", self.format_records(&new_records)),
            new_records: new_records.len(),
        }))
    }

    fn format_records(&self, records: &[&EventRecord]) -> String {
        records
            .iter()
            .map(|r| self.format_record(r))
            .collect::<Vec<_>>()
            .join(BLOCK_DIVIDER)
    }

    fn format_record(&self, record: &EventRecord) -> String {
        let max_people = match record.max_people {
            Some(n) => n.to_string(),
            None => "Unlimited".to_string(),
        };

        format!(
            r#"
📅 {}
--------------------------------------------------
📍 Location: {}
🏷️ Type: {}
⏰ When: {} - {} UTC
👥 Max Participants: {}
🔗 Link: {}{}

📝 Description:
{}
"#,
            or_na(&record.name),
            or_na(&record.location),
            humanize_kind(or_na(&record.kind)),
            format_timestamp(record.begin_at.as_deref(), "%B %-d, %Y %H:%M"),
            format_timestamp(record.end_at.as_deref(), "%H:%M"),
            max_people,
            self.profile_url,
            record.id,
            or_na(&record.description),
        )
    }
}

fn subject_line(count: usize) -> String {
    let noun = if count == 1 { "event" } else { "events" };
    format!("{} ({} new {})", SUBJECT_PREFIX, count, noun)
}

fn or_na(value: &Option<String>) -> &str {
    match value.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => "N/A",
    }
}

/// `hackathon_kick_off` -> `Hackathon Kick Off`
fn humanize_kind(kind: &str) -> String {
    kind.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn format_timestamp(raw: Option<&str>, fmt: &str) -> String {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc).format(fmt).to_string())
        .unwrap_or_else(|| "N/A".to_string())
}
