//! Durable interrupt marker.
//!
//! The marker file records every run that is inside its risky
//! publish/persist window. An empty file means the last shutdown was clean;
//! anything else means a run was in flight when the process stopped.
//!
//! Content is a JSON array of [`MarkerEntry`]. The file is truncated to
//! zero bytes when the last in-flight run disarms, so "empty" keeps its
//! plain meaning for operators inspecting it by hand.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// One in-flight run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerEntry {
    pub run_id: Uuid,
    pub event_name: String,
    pub armed_at: DateTime<Utc>,
}

impl MarkerEntry {
    pub fn new(run_id: Uuid, event_name: impl Into<String>) -> Self {
        Self {
            run_id,
            event_name: event_name.into(),
            armed_at: Utc::now(),
        }
    }
}

/// What the marker held when read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerContents {
    /// Clean prior shutdown
    Empty,

    /// Runs that were in flight
    Entries(Vec<MarkerEntry>),

    /// Non-empty but not in our format (free text, truncated write, ...)
    Unreadable(String),
}

impl MarkerContents {
    pub fn is_empty(&self) -> bool {
        matches!(self, MarkerContents::Empty)
    }
}

/// File-backed interrupt marker shared by all runs in the process.
///
/// Opening the marker takes an exclusive lock on a sibling `.lock` file that
/// is held until the marker is dropped, so exactly one process owns a given
/// marker. A second process fails to open it with [`io::ErrorKind::WouldBlock`]
/// instead of reconciling entries that belong to live runs.
///
/// File I/O runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct InterruptMarker {
    inner: Arc<MarkerFile>,
}

#[derive(Debug)]
struct MarkerFile {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    guard: Mutex<()>,
    // Ownership lock, released on drop
    _owner: File,
}

impl InterruptMarker {
    /// Open the marker, creating an empty file if none exists
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = lock_path(&path);
        let owner = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;
        if let Err(e) = owner.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!(
                        "interrupt marker {} is owned by another running process",
                        path.display()
                    ),
                ));
            }
            return Err(e);
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        debug!(path = %path.display(), "interrupt marker opened");

        Ok(Self {
            inner: Arc::new(MarkerFile {
                path,
                guard: Mutex::new(()),
                _owner: owner,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Read the current contents
    pub async fn read(&self) -> io::Result<MarkerContents> {
        self.with_file(|marker| {
            let _guard = marker.guard.lock();
            let mut file = marker.open_locked()?;
            let raw = read_all(&mut file)?;
            Ok(parse(&raw))
        })
        .await
    }

    /// Record a run as in flight. Durable on return.
    pub async fn arm(&self, entry: MarkerEntry) -> io::Result<()> {
        self.with_file(move |marker| {
            marker.update(|entries| {
                entries.retain(|e| e.run_id != entry.run_id);
                entries.push(entry);
            })
        })
        .await
    }

    /// Remove a run from the in-flight set
    pub async fn disarm(&self, run_id: Uuid) -> io::Result<()> {
        self.with_file(move |marker| marker.update(|entries| entries.retain(|e| e.run_id != run_id)))
            .await
    }

    /// Drop everything, leaving an empty file
    pub async fn clear(&self) -> io::Result<()> {
        self.with_file(|marker| {
            let _guard = marker.guard.lock();
            let mut file = marker.open_locked()?;
            write_entries(&mut file, &[])
        })
        .await
    }

    /// Run a closure against the marker file on the blocking pool
    async fn with_file<T, F>(&self, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MarkerFile) -> io::Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("marker task failed: {}", e)))?
    }
}

impl MarkerFile {
    fn update<F>(&self, f: F) -> io::Result<()>
    where
        F: FnOnce(&mut Vec<MarkerEntry>),
    {
        let _guard = self.guard.lock();
        let mut file = self.open_locked()?;
        let raw = read_all(&mut file)?;

        // Unreadable content only exists before boot-time recovery has run;
        // it is replaced rather than merged.
        let mut entries = match parse(&raw) {
            MarkerContents::Entries(entries) => entries,
            MarkerContents::Empty | MarkerContents::Unreadable(_) => Vec::new(),
        };
        f(&mut entries);
        write_entries(&mut file, &entries)
    }

    /// Open with an exclusive advisory lock, released on drop
    fn open_locked(&self) -> io::Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

/// `<marker>.lock`, next to the marker
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn read_all(file: &mut File) -> io::Result<String> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut raw)?;
    Ok(raw)
}

fn parse(raw: &str) -> MarkerContents {
    if raw.trim().is_empty() {
        return MarkerContents::Empty;
    }
    match serde_json::from_str::<Vec<MarkerEntry>>(raw) {
        Ok(entries) if entries.is_empty() => MarkerContents::Empty,
        Ok(entries) => MarkerContents::Entries(entries),
        Err(_) => MarkerContents::Unreadable(raw.trim().to_string()),
    }
}

fn write_entries(file: &mut File, entries: &[MarkerEntry]) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    if !entries.is_empty() {
        let json = serde_json::to_string(entries)?;
        file.write_all(json.as_bytes())?;
    }
    file.sync_all()
}
