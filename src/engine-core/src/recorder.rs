//! Book recorder: persists every synced book update to gzip-compressed
//! JSON-lines files, one per (platform, market) per UTC day, for later
//! replay and calibration.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tracing::{info, warn};

use crate::book::LiveOrderBook;

const DEFAULT_MIN_INTERVAL_MS: f64 = 100.0;

enum Handle {
    Plain(std::fs::File),
    Gz(GzEncoder<std::fs::File>),
}

impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Handle::Plain(f) => f.write(buf),
            Handle::Gz(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Handle::Plain(f) => f.flush(),
            Handle::Gz(f) => f.flush(),
        }
    }
}

struct OpenFile {
    path: PathBuf,
    handle: Handle,
}

#[derive(Serialize)]
struct Record<'a> {
    ts: String,
    platform: &'a str,
    market_id: &'a str,
    bids: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
    asks: Vec<(rust_decimal::Decimal, rust_decimal::Decimal)>,
}

/// Writes book snapshots to disk, deduplicated to at most one write per
/// key per `min_interval_ms` using a monotonic clock so wall-clock
/// adjustments can't skip or double a write.
pub struct BookRecorder {
    dir: PathBuf,
    compress: bool,
    min_interval_ms: f64,
    last_write: StdMutex<HashMap<String, Instant>>,
    handles: StdMutex<HashMap<String, OpenFile>>,
    closed: std::sync::atomic::AtomicBool,
}

impl BookRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_options(dir, true, DEFAULT_MIN_INTERVAL_MS)
    }

    pub fn with_options(dir: impl Into<PathBuf>, compress: bool, min_interval_ms: f64) -> Self {
        Self {
            dir: dir.into(),
            compress,
            min_interval_ms,
            last_write: StdMutex::new(HashMap::new()),
            handles: StdMutex::new(HashMap::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Callback target for `BookRegistry::add_global_callback`.
    pub fn on_book_update(self: &std::sync::Arc<Self>, book: std::sync::Arc<LiveOrderBook>) {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let key = format!("{}:{}", book.platform, book.market_id);

        {
            let mut last = self.last_write.lock().unwrap();
            let now = Instant::now();
            if let Some(prev) = last.get(&key) {
                if now.duration_since(*prev).as_secs_f64() * 1000.0 < self.min_interval_ms {
                    return;
                }
            }
            last.insert(key.clone(), now);
        }

        let this = self.clone();
        // Snapshot is async (book is behind a tokio mutex); spawn so this
        // callback, invoked synchronously from the book, doesn't block.
        tokio::spawn(async move {
            let snapshot = book.snapshot().await;
            this.write(&key, &snapshot);
        });
    }

    fn write(&self, key: &str, snapshot: &crate::book::BookSnapshot) {
        let ts = Utc::now();
        let record = Record {
            ts: ts.to_rfc3339(),
            platform: snapshot.platform.as_str(),
            market_id: &snapshot.market_id,
            bids: snapshot.bids.clone(),
            asks: snapshot.asks.clone(),
        };

        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "recorder: failed to serialize record");
                return;
            }
        };

        let mut handles = self.handles.lock().unwrap();
        let expected_path = self.expected_path(snapshot.platform.as_str(), &snapshot.market_id, ts);

        if let Some(existing) = handles.get(key) {
            if existing.path != expected_path {
                handles.remove(key);
            }
        }

        if !handles.contains_key(key) {
            match self.open_handle(&expected_path) {
                Ok(handle) => {
                    info!(path = %expected_path.display(), "recorder: opened recording file");
                    handles.insert(
                        key.to_string(),
                        OpenFile { path: expected_path.clone(), handle },
                    );
                }
                Err(e) => {
                    warn!(error = %e, path = %expected_path.display(), "recorder: failed to open file");
                    return;
                }
            }
        }

        let open_file = handles.get_mut(key).unwrap();
        if let Err(e) = writeln!(open_file.handle, "{line}").and_then(|_| open_file.handle.flush()) {
            warn!(error = %e, "recorder: write failed, dropping handle");
            handles.remove(key);
        }
    }

    fn expected_path(&self, platform: &str, market_id: &str, ts: chrono::DateTime<Utc>) -> PathBuf {
        let date_str = ts.format("%Y-%m-%d").to_string();
        let ext = if self.compress { "jsonl.gz" } else { "jsonl" };
        let filename = format!("{}_{}.{}", platform, safe_filename(market_id), ext);
        self.dir.join(date_str).join(filename)
    }

    fn open_handle(&self, path: &Path) -> std::io::Result<Handle> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        if self.compress {
            Ok(Handle::Gz(GzEncoder::new(file, Compression::default())))
        } else {
            Ok(Handle::Plain(file))
        }
    }

    /// Flush and drop all open handles; further updates are ignored.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut handles = self.handles.lock().unwrap();
        for (_, mut open_file) in handles.drain() {
            let _ = open_file.handle.flush();
        }
    }

    /// List recorded files under `dir`, sorted, for replay tooling.
    pub fn list_recordings(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        for entry in walk(dir)? {
            if let Some(ext) = entry.extension().and_then(|e| e.to_str()) {
                if ext == "gz" || ext == "jsonl" {
                    out.push(entry);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn walk(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path)?);
        } else {
            out.push(path);
        }
    }
    Ok(out)
}

fn safe_filename(s: &str) -> String {
    s.replace('/', "-").replace(':', "-").replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_sanitizes_reserved_characters() {
        assert_eq!(safe_filename("KAL/RAIN:NYC 2028"), "KAL-RAIN-NYC_2028");
    }

    #[test]
    fn expected_path_uses_date_and_platform_prefix() {
        let recorder = BookRecorder::new("data/recordings");
        let ts = chrono::DateTime::parse_from_rfc3339("2026-07-28T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = recorder.expected_path("kalshi", "PRES-2028", ts);
        assert_eq!(
            path,
            PathBuf::from("data/recordings/2026-07-28/kalshi_PRES-2028.jsonl.gz")
        );
    }

    #[tokio::test]
    async fn list_recordings_is_empty_for_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let found = BookRecorder::list_recordings(&missing).unwrap();
        assert!(found.is_empty());
    }
}
