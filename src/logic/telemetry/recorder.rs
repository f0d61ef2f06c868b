//! Telemetry Recorder
//!
//! Append-only JSONL writer. Thread-safe, flushed per line, rotates by size.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use super::event::TelemetryEvent;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Maximum file size before rotation (50 MB)
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Default directory name under the local data dir
const LOG_DIR: &str = "telemetry";

const LOG_EXT: &str = "jsonl";

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// RECORDER
// ============================================================================

struct OpenFile {
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
}

pub struct JsonlRecorder {
    base_dir: PathBuf,
    max_file_size: u64,
    file: Mutex<OpenFile>,
    /// Files opened this session (keeps names unique within one second)
    sequence: AtomicU64,
    events_recorded: AtomicU64,
}

impl JsonlRecorder {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, RecorderError> {
        Self::with_max_size(base_dir, MAX_FILE_SIZE)
    }

    pub fn with_max_size(base_dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self, RecorderError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        let file = open_new_file(&base_dir, 0)?;

        Ok(Self {
            base_dir,
            max_file_size: max_file_size.max(1),
            file: Mutex::new(file),
            sequence: AtomicU64::new(1),
            events_recorded: AtomicU64::new(0),
        })
    }

    /// `<local data dir>/vehicle-guard/telemetry`
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vehicle-guard")
            .join(LOG_DIR)
    }

    pub fn record(&self, event: &TelemetryEvent) -> Result<(), RecorderError> {
        let line = serde_json::to_string(event)?;
        let bytes = line.len() as u64 + 1;

        let mut file = self.file.lock();
        if file.size > 0 && file.size + bytes > self.max_file_size {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let next = open_new_file(&self.base_dir, seq)?;
            file.writer.flush()?;
            log::info!("[Telemetry] Rotated {:?} → {:?}", file.path, next.path);
            *file = next;
        }

        file.writer.write_all(line.as_bytes())?;
        file.writer.write_all(b"\n")?;
        file.writer.flush()?;
        file.size += bytes;

        self.events_recorded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn current_file(&self) -> PathBuf {
        self.file.lock().path.clone()
    }

    pub fn events_recorded(&self) -> u64 {
        self.events_recorded.load(Ordering::Relaxed)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn flush(&self) -> Result<(), RecorderError> {
        self.file.lock().writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlRecorder {
    fn drop(&mut self) {
        let _ = self.file.get_mut().writer.flush();
    }
}

fn open_new_file(base_dir: &Path, seq: u64) -> std::io::Result<OpenFile> {
    let filename = format!("telemetry_{}_{:03}.{}", Utc::now().format("%Y%m%d_%H%M%S"), seq, LOG_EXT);
    let path = base_dir.join(filename);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let size = file.metadata()?.len();

    log::info!("[Telemetry] Opened log: {:?}", path);
    Ok(OpenFile {
        writer: BufWriter::new(file),
        path,
        size,
    })
}

// ============================================================================
// QUERY API
// ============================================================================

/// Read all events from a log file (malformed lines skipped)
pub fn read_events(path: &Path) -> Result<Vec<TelemetryEvent>, RecorderError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<TelemetryEvent>(&line) {
            events.push(event);
        }
    }
    Ok(events)
}

/// All `.jsonl` files in `dir`, sorted by name
pub fn list_log_files(dir: &Path) -> Result<Vec<PathBuf>, RecorderError> {
    let mut files = Vec::new();
    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == LOG_EXT) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::telemetry::event::EventType;
    use tempfile::TempDir;

    #[test]
    fn test_recorder_creation() {
        let dir = TempDir::new().unwrap();
        let recorder = JsonlRecorder::new(dir.path()).unwrap();
        assert!(recorder.current_file().exists());
    }

    #[test]
    fn test_jsonl_format() {
        let dir = TempDir::new().unwrap();
        let recorder = JsonlRecorder::new(dir.path()).unwrap();
        for i in 0..3 {
            recorder
                .record(&TelemetryEvent::new(EventType::AnomalyDetected, &format!("anomaly {}", i)).with_tick(i))
                .unwrap();
        }

        let content = std::fs::read_to_string(recorder.current_file()).unwrap();
        assert_eq!(content.lines().count(), 3);

        let events = read_events(&recorder.current_file()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].tick, Some(2));
        assert_eq!(recorder.events_recorded(), 3);
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = TempDir::new().unwrap();
        let recorder = JsonlRecorder::with_max_size(dir.path(), 64).unwrap();
        let first = recorder.current_file();

        recorder.record(&TelemetryEvent::system_start("0.1.0")).unwrap();
        recorder.record(&TelemetryEvent::system_stop(1, 1)).unwrap();

        assert_ne!(recorder.current_file(), first);
        let files = list_log_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);

        let total: usize = files.iter().map(|f| read_events(f).unwrap().len()).sum();
        assert_eq!(total, 2);
    }
}
