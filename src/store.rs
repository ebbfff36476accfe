//! The top-level store coordinator: binds the segment manager and keydir
//! together, owns recovery, and exposes the public put/get/delete/close
//! surface consumed by the (out-of-scope) service layer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::keydir::{Keydir, Location};
use crate::lock::DirLock;
use crate::manager::SegmentManager;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct StoreState {
    manager: SegmentManager,
    keydir: Keydir,
}

struct FsyncTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Store {
    #[allow(dead_code)] // kept for diagnostics / potential future reopen-by-path helpers
    dir: PathBuf,
    options: Arc<Options>,
    state: Arc<RwLock<StoreState>>,
    // Held for the store's lifetime but released early by `close()`, not just
    // on `Drop` — a caller that closes while keeping the handle alive (e.g.
    // to still call `len()`) must not leave a later `open` on the same
    // directory spuriously failing with `AlreadyLocked`.
    dir_lock: Mutex<Option<DirLock>>,
    closed: AtomicBool,
    sink: Option<EventSink>,
    fsync_task: Option<FsyncTask>,
}

impl Store {
    /// Opens (creating if missing) a store at `path` with no event sink.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::open_with_sink(path, options, None)
    }

    /// Opens a store, delivering structured events to `sink`.
    pub fn open_with_sink(path: impl AsRef<Path>, options: Options, sink: Option<EventSink>) -> Result<Self> {
        options.validate()?;
        let dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let dir_lock = DirLock::acquire(&dir)?;

        let options = Arc::new(options);
        let manager = SegmentManager::open(&dir, options.clone())?;
        let keydir = recover(&manager, sink.as_ref())?;

        let state = Arc::new(RwLock::new(StoreState { manager, keydir }));
        let fsync_task = spawn_background_sync(state.clone(), &options);

        Ok(Store {
            dir,
            options,
            state,
            dir_lock: Mutex::new(Some(dir_lock)),
            closed: AtomicBool::new(false),
            sink,
            fsync_task,
        })
    }

    fn emit(&self, event: Event) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty".into()));
        }
        if key.as_bytes().len() as u32 > self.options.max_key_size {
            return Err(Error::InvalidKey(format!(
                "key of {} bytes exceeds max_key_size of {} bytes",
                key.len(),
                self.options.max_key_size
            )));
        }
        Ok(())
    }

    /// Writes `value` under `key`, overwriting any prior value.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.validate_key(key)?;
        if value.len() as u32 > self.options.max_value_size {
            return Err(Error::OversizedValue { len: value.len(), max: self.options.max_value_size as usize });
        }

        let timestamp = now_ms();
        let size = crate::record::framed_size(key.as_bytes().len() as u32, value.len() as u32) as u32;
        let mut guard = self.state.write().unwrap();
        let (segment_id, offset, rotated) = guard.manager.append(key, value, timestamp, false)?;
        let location = Location { segment_id, offset, size, timestamp };
        guard.keydir.put(key.to_string(), location);
        drop(guard);

        if let Some((sealed_id, new_active_id)) = rotated {
            self.emit(Event::SegmentRotate { sealed_id, new_active_id });
        }
        self.emit(Event::StorePut { key: key.to_string(), tombstone: false, segment_id, offset });
        Ok(())
    }

    /// Looks up `key`. `None` on miss (including a deleted key).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.validate_key(key)?;

        let (location, segment) = {
            let guard = self.state.read().unwrap();
            let Some(location) = guard.keydir.get(key) else {
                drop(guard);
                self.emit(Event::StoreGet { key: key.to_string(), hit: false });
                return Ok(None);
            };
            let segment = guard
                .manager
                .segment(location.segment_id)
                .ok_or_else(|| Error::KeydirStale { key: key.to_string() })?;
            (location, segment)
        };

        // The actual file read happens without holding the state lock.
        let record = segment.read_at(location.offset)?;
        if record.timestamp != location.timestamp {
            return Err(Error::KeydirStale { key: key.to_string() });
        }
        self.emit(Event::StoreGet { key: key.to_string(), hit: !record.tombstone });
        if record.tombstone {
            // Should not happen: tombstones are never kept in the keydir.
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    /// Appends a tombstone for `key` and removes it from the keydir.
    /// Writing a tombstone for a key with no live value is a harmless no-op.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.validate_key(key)?;

        let timestamp = now_ms();
        let size = crate::record::framed_size(key.as_bytes().len() as u32, 0) as u32;
        let mut guard = self.state.write().unwrap();
        let (segment_id, offset, rotated) = guard.manager.append(key, &[], timestamp, true)?;
        let location = Location { segment_id, offset, size, timestamp };
        guard.keydir.delete(key, location);
        drop(guard);

        if let Some((sealed_id, new_active_id)) = rotated {
            self.emit(Event::SegmentRotate { sealed_id, new_active_id });
        }
        self.emit(Event::StorePut { key: key.to_string(), tombstone: true, segment_id, offset });
        Ok(())
    }

    /// Number of live keys currently tracked in memory.
    pub fn len(&self) -> usize {
        self.state.read().unwrap().keydir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the active segment, stops the background fsync task, and
    /// releases the directory lock. Further operations fail with
    /// `StoreClosed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = {
            let mut guard = self.state.write().unwrap();
            guard.manager.close()
        };
        // Release the lock even if sealing failed: the store is marked
        // closed regardless, so nothing else in this process will touch the
        // directory again, and a later `open` elsewhere should not see a
        // stale `AlreadyLocked`.
        self.dir_lock.lock().unwrap().take();
        result
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Some(task) = self.fsync_task.take() {
            task.stop.store(true, Ordering::Release);
            let _ = task.handle.join();
        }
        if let Err(err) = self.close() {
            log::error!("failed to close store cleanly: {err}");
        }
    }
}

/// Spawns the periodic background fsync task (§5): it takes the write
/// lock briefly per cycle and never blocks the write path for longer than
/// one fsync of the active segment's `.log`. Disabled when
/// `fsync_interval_s` is `0`.
fn spawn_background_sync(state: Arc<RwLock<StoreState>>, options: &Options) -> Option<FsyncTask> {
    if options.fsync_interval_s == 0 {
        return None;
    }
    let interval = Duration::from_secs(options.fsync_interval_s);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    let handle = std::thread::spawn(move || {
        while !stop_clone.load(Ordering::Acquire) {
            std::thread::sleep(interval);
            if stop_clone.load(Ordering::Acquire) {
                break;
            }
            let guard = state.write().unwrap();
            if let Err(err) = guard.manager.sync_active() {
                log::warn!("periodic fsync failed: {err}");
            }
        }
    });
    Some(FsyncTask { stop, handle })
}

/// Runs the open-time recovery procedure (§4.5): for every segment in
/// ascending id order, prefer its `.log.index` sidecar; fall back to a raw
/// `.log` scan (and regenerate the sidecar) if the index is missing,
/// empty, or malformed.
fn recover(manager: &SegmentManager, sink: Option<&EventSink>) -> Result<Keydir> {
    let mut keydir = Keydir::new();

    for (&segment_id, segment) in manager.segments_ascending() {
        // An index that parses cleanly can still be stale: a crash between a
        // completed `.log` append and its corresponding `.index` append
        // leaves a syntactically valid but short sidecar. Cross-check the
        // parsed entry count against the segment's own authoritative count
        // (already reconciled against the `.log` length in `open_existing`)
        // before trusting the fast path.
        let parsed = segment.load_index().filter(|entries| entries.len() as u64 == segment.entries());

        match parsed {
            Some(entries) => {
                for entry in entries {
                    let location = Location {
                        segment_id: entry.segment_id,
                        offset: entry.offset,
                        size: entry.framed_size as u32,
                        timestamp: entry.timestamp,
                    };
                    if entry.tombstone {
                        keydir.delete(&entry.key, location);
                    } else {
                        keydir.put(entry.key, location);
                    }
                }
            }
            None => {
                if let Some(sink) = sink {
                    sink(Event::RecoveryFallbackScan {
                        segment_id,
                        reason: "index missing, empty, malformed, or inconsistent with segment entry count".to_string(),
                    });
                }
                log::warn!("segment {segment_id}: falling back to log scan for recovery");
                for item in segment.scan()? {
                    let (offset, record) = item?;
                    let size = crate::record::framed_size(
                        record.key.as_bytes().len() as u32,
                        record.value.len() as u32,
                    ) as u32;
                    let location = Location { segment_id, offset, size, timestamp: record.timestamp };
                    if record.tombstone {
                        keydir.delete(&record.key, location);
                    } else {
                        keydir.put(record.key, location);
                    }
                }
                segment.rebuild_index()?;
            }
        }
    }

    if let Some(sink) = sink {
        sink(Event::RecoveryComplete { live_keys: keydir.len() });
    }
    log::info!("recovery complete: {} live key(s)", keydir.len());
    Ok(keydir)
}
