//! Spool Transport
//!
//! Writes each transmission as a JSON file into an outbox directory for an
//! uploader to pick up:
//!
//! ```text
//! outbox/
//!   sensor-data-<anonymous_id>-000001.json
//!   analytics-daily-report-<anonymous_id>-000002.json
//!   responses/<anonymous_id>.json     (optional backend rate history)
//! ```
//!
//! When a daily report is spooled and a response file exists for the
//! installation, its rate history is handed back as the backend response and
//! the file is removed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;

use hvac_analytics::{BackendResponse, RateHistoryEntry, SendOutcome, Transmission, Transport};

use crate::identity::is_valid_anonymous_id;

const RESPONSES_DIR: &str = "responses";

pub struct SpoolTransport {
    outbox_dir: PathBuf,
    seq: AtomicU64,
}

impl SpoolTransport {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Create the outbox and continue numbering after any files already in it
    pub async fn open(outbox_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let transport = Self::new(outbox_dir);
        fs::create_dir_all(&transport.outbox_dir).await?;

        let mut last = 0;
        let mut entries = fs::read_dir(&transport.outbox_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(seq) = entry.file_name().to_str().and_then(parse_seq) {
                last = last.max(seq);
            }
        }
        transport.seq.store(last, Ordering::SeqCst);

        tracing::info!(
            outbox = %transport.outbox_dir.display(),
            next_seq = last + 1,
            "Spool transport ready"
        );
        Ok(transport)
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }

    async fn write(&self, file_name: &str, body: &[u8]) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.outbox_dir).await?;
        let path = self.outbox_dir.join(file_name);
        // Rename into place so a reader never sees a partial file
        let tmp = self.outbox_dir.join(format!(".{file_name}.tmp"));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    async fn take_response(&self, anonymous_id: &str) -> Vec<RateHistoryEntry> {
        let path = self
            .outbox_dir
            .join(RESPONSES_DIR)
            .join(format!("{anonymous_id}.json"));

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove response file");
        }

        match serde_json::from_str::<BackendResponse>(&content) {
            Ok(response) => response.rate_history,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed response file");
                Vec::new()
            }
        }
    }
}

/// Sequence number from `<endpoint>-<id>-<seq>.json`
fn parse_seq(file_name: &str) -> Option<u64> {
    file_name
        .strip_suffix(".json")?
        .rsplit('-')
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl Transport for SpoolTransport {
    async fn send(&self, item: &Transmission) -> SendOutcome {
        // The id becomes part of a path; a bad one will never write
        if !is_valid_anonymous_id(item.anonymous_id()) {
            return SendOutcome::Fatal(format!(
                "anonymous id {:?} is not a valid file name",
                item.anonymous_id()
            ));
        }

        let body = match serde_json::to_vec_pretty(item) {
            Ok(body) => body,
            Err(e) => return SendOutcome::Fatal(format!("serialization failed: {e}")),
        };

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let file_name = format!("{}-{}-{:06}.json", item.endpoint(), item.anonymous_id(), seq);

        match self.write(&file_name, &body).await {
            Ok(path) => {
                tracing::debug!(path = %path.display(), bytes = body.len(), "Spooled transmission");
            }
            Err(e) => return SendOutcome::Retriable(format!("{}: {e}", file_name)),
        }

        let rate_history = match item {
            Transmission::DailyReport(_) => self.take_response(item.anonymous_id()).await,
            Transmission::SampleBatch(_) => Vec::new(),
        };
        SendOutcome::Delivered(BackendResponse { rate_history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use hvac_analytics::{
        AnalyticsConfig, DailyAggregator, DeliveryQueue, HvacState, MovingAverages, ReportEnvelope,
        Sample, SampleBatch,
    };
    use tempfile::TempDir;

    fn batch(id: &str) -> Transmission {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        Transmission::SampleBatch(SampleBatch {
            anonymous_id: id.to_string(),
            readings: vec![Sample::new(ts, 70.0, HvacState::Off, 72.0)],
            weather: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_spools_numbered_files() {
        let dir = TempDir::new().unwrap();
        let transport = SpoolTransport::open(dir.path()).await.unwrap();

        assert!(matches!(transport.send(&batch("abc")).await, SendOutcome::Delivered(_)));
        assert!(matches!(transport.send(&batch("abc")).await, SendOutcome::Delivered(_)));

        let first = dir.path().join("sensor-data-abc-000001.json");
        let content = fs::read_to_string(&first).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["anonymous_id"], "abc");
        assert_eq!(json["readings"][0]["hvac_state"], "OFF");
        assert!(dir.path().join("sensor-data-abc-000002.json").exists());
    }

    #[tokio::test]
    async fn test_reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let transport = SpoolTransport::open(dir.path()).await.unwrap();
            transport.send(&batch("abc")).await;
        }

        let transport = SpoolTransport::open(dir.path()).await.unwrap();
        transport.send(&batch("abc")).await;
        assert!(dir.path().join("sensor-data-abc-000002.json").exists());
    }

    #[tokio::test]
    async fn test_unwritable_outbox_is_retriable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("outbox");
        fs::write(&blocker, "not a directory").await.unwrap();

        let transport = SpoolTransport::new(&blocker);
        assert!(matches!(transport.send(&batch("abc")).await, SendOutcome::Retriable(_)));
    }

    #[tokio::test]
    async fn test_daily_report_picks_up_response_file() {
        let dir = TempDir::new().unwrap();
        let transport = SpoolTransport::open(dir.path()).await.unwrap();

        let responses = dir.path().join(RESPONSES_DIR);
        fs::create_dir_all(&responses).await.unwrap();
        fs::write(
            responses.join("abc.json"),
            r#"{"rate_history":[{"date":"2024-02-29","anonymous_id":"abc","heating_rate":2.5}]}"#,
        )
        .await
        .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let report = DailyAggregator::new(date, "abc", &AnalyticsConfig::default()).seal();
        let item = Transmission::DailyReport(ReportEnvelope::new(report, MovingAverages::default()));

        match transport.send(&item).await {
            SendOutcome::Delivered(response) => {
                assert_eq!(response.rate_history.len(), 1);
                assert_eq!(response.rate_history[0].heating_rate, Some(2.5));
                assert_eq!(response.rate_history[0].cooling_rate, None);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert!(!responses.join("abc.json").exists());
        assert!(dir.path().join("analytics-daily-report-abc-000001.json").exists());
    }

    #[tokio::test]
    async fn test_unsafe_id_does_not_block_the_queue() {
        let dir = TempDir::new().unwrap();
        let transport = SpoolTransport::open(dir.path()).await.unwrap();
        assert!(matches!(transport.send(&batch("a/b")).await, SendOutcome::Fatal(_)));

        let mut queue = DeliveryQueue::new(10, 10);
        queue.enqueue(batch("a/b"));
        queue.enqueue(batch("good"));
        let summary = queue.drain(&transport).await;

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.remaining, 0);
        assert!(dir.path().join("sensor-data-good-000001.json").exists());
    }

    #[test]
    fn test_parse_seq() {
        assert_eq!(parse_seq("analytics-daily-report-1f2e-000042.json"), Some(42));
        assert_eq!(parse_seq(".sensor-data-a-000001.json.tmp"), None);
        assert_eq!(parse_seq("notes.txt"), None);
    }
}
