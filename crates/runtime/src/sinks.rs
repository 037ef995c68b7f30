//! Built-in alert outputs.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ppewatch_model::{AlertRecord, Notification};

use crate::collaborators::{AlertSink, Notifier};
use crate::error::SinkError;

/// Appends alert records to a JSONL file, one record per line.
///
/// Every record is flushed as soon as it is written, so a crash never
/// loses an alert that was reported as persisted. From async code the
/// write runs on a blocking thread.
pub struct JsonlAlertSink {
    path: PathBuf,
    inner: Arc<Mutex<SinkState>>,
}

struct SinkState {
    writer: BufWriter<File>,
    records_written: u64,
}

fn write_record(inner: &Mutex<SinkState>, record: &AlertRecord) -> Result<(), SinkError> {
    let json = serde_json::to_string(record)?;
    let mut state = inner.lock().map_err(|_| SinkError::Delivery {
        message: "alert log writer poisoned".to_string(),
    })?;
    writeln!(state.writer, "{json}")?;
    state.writer.flush()?;
    state.records_written += 1;
    Ok(())
}

impl JsonlAlertSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "Alert log opened");
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(SinkState {
                writer: BufWriter::new(file),
                records_written: 0,
            })),
        })
    }

    /// Write one record and flush it to disk.
    pub fn append(&self, record: &AlertRecord) -> Result<(), SinkError> {
        write_record(&self.inner, record)
    }

    /// Records written since the sink was opened.
    pub fn records_written(&self) -> u64 {
        self.inner
            .lock()
            .map(|state| state.records_written)
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl AlertSink for JsonlAlertSink {
    async fn persist(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let inner = self.inner.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || write_record(&inner, &record))
            .await
            .map_err(|e| SinkError::Delivery {
                message: format!("alert log writer task failed: {e}"),
            })?
    }
}

/// Delivers notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        let image = notification
            .image
            .as_ref()
            .map(|image| format!("{:?}", image.region));
        tracing::info!(
            camera = %notification.camera_id,
            image = image.as_deref().unwrap_or("none"),
            "Alert notification\n{}",
            notification.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ppewatch_model::BBox;

    fn record(track: u64) -> AlertRecord {
        AlertRecord {
            camera_id: "cam-1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            grid_x: 2,
            grid_y: 3,
            person_track_id: track,
            missing_ppe: vec!["helmet".to_string()],
            person_box: BBox::new(10.0, 10.0, 50.0, 120.0),
            roi_name: None,
            frame_width: 640,
            frame_height: 480,
            alert_duration_seconds: 16.0,
            image: None,
        }
    }

    #[test]
    fn test_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts").join("alerts.jsonl");
        let sink = JsonlAlertSink::open(&path).unwrap();

        sink.append(&record(1)).unwrap();
        sink.append(&record(2)).unwrap();
        assert_eq!(sink.records_written(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: AlertRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.person_track_id, 2);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        JsonlAlertSink::open(&path).unwrap().append(&record(1)).unwrap();
        JsonlAlertSink::open(&path).unwrap().append(&record(2)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_persists_write_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let sink = Arc::new(JsonlAlertSink::open(&path).unwrap());

        let mut writers = tokio::task::JoinSet::new();
        for track in 0..8 {
            let sink = sink.clone();
            writers.spawn(async move { sink.persist(&record(track)).await });
        }
        while let Some(written) = writers.join_next().await {
            written.unwrap().unwrap();
        }
        assert_eq!(sink.records_written(), 8);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut tracks: Vec<u64> = content
            .lines()
            .map(|line| serde_json::from_str::<AlertRecord>(line).unwrap().person_track_id)
            .collect();
        tracks.sort_unstable();
        assert_eq!(tracks, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notification = Notification {
            camera_id: "cam-1".to_string(),
            message: "Camera: cam-1".to_string(),
            image: None,
        };
        assert!(LogNotifier.send(&notification).await.is_ok());
    }
}
