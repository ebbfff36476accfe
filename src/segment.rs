//! A segment: one append-only `.log` file plus its `.hint` and
//! `.log.index` sidecars.
//!
//! Concurrency: segments are shared via `Arc<Segment>` so that sealed
//! segments can be read by many threads at once without coordination.
//! Reads use positioned (`pread`-style) I/O against a dedicated read-only
//! handle so they never race the writer's file cursor; writes go through a
//! `Mutex`-guarded buffered writer, serialized in practice by the store's
//! single-writer lock but made internally safe regardless.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::record::{self, Record, HEADER_LEN};

/// JSON sidecar describing a segment's bookkeeping. Field names and the
/// `0|1` encoding of `active`/`closed` match the external interface
/// exactly, so the file is also legible to out-of-process tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hint {
    pub id: u64,
    pub path: String,
    pub size: u64,
    pub entries: u64,
    pub max_size: u64,
    pub max_entries: u64,
    pub active: u8,
    pub closed: u8,
    pub created_at_ms: u64,
    pub last_synced_at_ms: u64,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn log_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("segment_{id}.log"))
}

fn hint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("segment_{id}.hint"))
}

fn index_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("segment_{id}.log.index"))
}

/// Escapes a key for storage in a tab-separated index line.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_key(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '\\' => out.push('\\'),
                't' => out.push('\t'),
                'n' => out.push('\n'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// One parsed line of a `.log.index` sidecar.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: String,
    pub segment_id: u64,
    pub offset: u64,
    pub framed_size: u64,
    pub timestamp: u64,
    pub tombstone: bool,
}

fn format_index_line(entry: &IndexEntry) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\n",
        escape_key(&entry.key),
        entry.segment_id,
        entry.offset,
        entry.framed_size,
        entry.timestamp,
        entry.tombstone as u8
    )
}

fn parse_index_line(line: &str) -> Option<IndexEntry> {
    let mut fields = line.split('\t');
    let key = unescape_key(fields.next()?)?;
    let segment_id = fields.next()?.parse().ok()?;
    let offset = fields.next()?.parse().ok()?;
    let framed_size = fields.next()?.parse().ok()?;
    let timestamp = fields.next()?.parse().ok()?;
    let tombstone = match fields.next()? {
        "0" => false,
        "1" => true,
        _ => return None,
    };
    if fields.next().is_some() {
        return None; // trailing garbage, malformed line
    }
    Some(IndexEntry { key, segment_id, offset, framed_size, timestamp, tombstone })
}

struct Writer {
    log: BufWriter<File>,
    index: BufWriter<File>,
}

pub struct Segment {
    id: u64,
    dir: PathBuf,
    max_size: u64,
    max_entries: u64,
    fsync_on_append: bool,
    created_at_ms: u64,
    last_synced_at_ms: AtomicU64,
    size: AtomicU64,
    entries: AtomicU64,
    active: AtomicBool,
    closed: AtomicBool,
    read_log: File,
    writer: Mutex<Option<Writer>>,
}

impl Segment {
    /// Creates a brand new active segment: fresh `.log`, initialized
    /// `.hint`, empty `.index`.
    pub fn create(dir: &Path, id: u64, options: &Options) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let log = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(log_path(dir, id))?;
        let index = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(index_path(dir, id))?;
        let read_log = log.try_clone()?;
        let created_at_ms = now_ms();
        let segment = Segment {
            id,
            dir: dir.to_path_buf(),
            max_size: options.max_segment_size,
            max_entries: options.max_entries_per_segment,
            fsync_on_append: options.sync || options.fsync_on_append,
            created_at_ms,
            last_synced_at_ms: AtomicU64::new(created_at_ms),
            size: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            active: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            read_log,
            writer: Mutex::new(Some(Writer { log: BufWriter::new(log), index: BufWriter::new(index) })),
        };
        segment.persist_hint()?;
        log::debug!("created segment {id} in {}", dir.display());
        Ok(segment)
    }

    /// Reopens a segment that already exists on disk. `mark_active`
    /// requests that it be reopened for appends; the caller (the segment
    /// manager) still applies the size/entry threshold check of §4.3
    /// before trusting that request.
    pub fn open_existing(dir: &Path, id: u64, options: &Options, mark_active: bool) -> Result<Self> {
        let path = log_path(dir, id);
        let actual_len = std::fs::metadata(&path)?.len();
        let hint = Self::load_hint(&hint_path(dir, id));

        let (size, entries, needs_truncate_to) = match &hint {
            Some(h) if h.size == actual_len => (h.size, h.entries, None),
            _ => {
                log::warn!(
                    "segment {id} hint missing or inconsistent with log length ({actual_len} bytes); rescanning"
                );
                let (entries, valid_len) = Self::count_scan(&path, id)?;
                (valid_len, entries, if valid_len != actual_len { Some(valid_len) } else { None })
            }
        };

        if let Some(valid_len) = needs_truncate_to {
            log::warn!("truncating segment {id} log from {actual_len} to {valid_len} bytes (partial trailing write)");
            let f = OpenOptions::new().write(true).open(&path)?;
            f.set_len(valid_len)?;
        }

        let created_at_ms = hint.as_ref().map(|h| h.created_at_ms).unwrap_or_else(now_ms);
        let read_log = OpenOptions::new().read(true).open(&path)?;

        let writer = if mark_active {
            let log = OpenOptions::new().read(true).write(true).append(true).open(&path)?;
            let index = OpenOptions::new().read(true).write(true).append(true).create(true).open(index_path(dir, id))?;
            Some(Writer { log: BufWriter::new(log), index: BufWriter::new(index) })
        } else {
            None
        };

        Ok(Segment {
            id,
            dir: dir.to_path_buf(),
            max_size: options.max_segment_size,
            max_entries: options.max_entries_per_segment,
            fsync_on_append: options.sync || options.fsync_on_append,
            created_at_ms,
            last_synced_at_ms: AtomicU64::new(now_ms()),
            size: AtomicU64::new(size),
            entries: AtomicU64::new(entries),
            active: AtomicBool::new(mark_active),
            closed: AtomicBool::new(!mark_active),
            read_log,
            writer: Mutex::new(writer),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Appends a pre-encoded, framed record. Returns its byte offset.
    ///
    /// Fails with `SegmentFull` if this append would push size or entry
    /// count past the configured thresholds — the caller (segment manager)
    /// rotates and retries rather than writing past the bound.
    pub fn append(&self, framed: &[u8], key: &str, timestamp: u64, tombstone: bool) -> Result<u64> {
        if !self.is_active() {
            return Err(Error::SegmentSealed { segment_id: self.id });
        }
        let cur_size = self.size.load(Ordering::Acquire);
        let cur_entries = self.entries.load(Ordering::Acquire);
        let framed_len = framed.len() as u64;
        if cur_size + framed_len > self.max_size || cur_entries + 1 > self.max_entries {
            return Err(Error::SegmentFull);
        }

        let mut guard = self.writer.lock().unwrap();
        let writer = guard.as_mut().ok_or(Error::SegmentSealed { segment_id: self.id })?;
        let offset = cur_size;

        writer.log.write_all(framed)?;
        writer.log.flush()?;
        if self.fsync_on_append {
            writer.log.get_ref().sync_all()?;
        }

        let entry = IndexEntry {
            key: key.to_string(),
            segment_id: self.id,
            offset,
            framed_size: framed_len,
            timestamp,
            tombstone,
        };
        // Index failures are tolerated: recovery can always regenerate the
        // sidecar from the authoritative log.
        match writer.index.write_all(format_index_line(&entry).as_bytes()).and_then(|_| writer.index.flush()) {
            Ok(()) => {
                if self.fsync_on_append {
                    if let Err(err) = writer.index.get_ref().sync_all() {
                        log::warn!("segment {}: failed to fsync index entry for {key:?}: {err}", self.id);
                    }
                }
            }
            Err(err) => log::warn!("segment {}: failed to append index entry for {key:?}: {err}", self.id),
        }

        self.size.store(cur_size + framed_len, Ordering::Release);
        self.entries.store(cur_entries + 1, Ordering::Release);
        Ok(offset)
    }

    /// Reads the full framed record starting at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Record> {
        let mut header_buf = [0u8; HEADER_LEN];
        self.pread_exact(offset, &mut header_buf)
            .map_err(|e| self.annotate(offset, e))?;
        let header = record::decode_header(&header_buf).map_err(|e| self.annotate(offset, e))?;
        let total = record::framed_size(header.key_size, header.value_size);
        let mut buf = vec![0u8; total];
        self.pread_exact(offset, &mut buf).map_err(|e| self.annotate(offset, e))?;
        let (rec, _) = record::decode(&buf).map_err(|e| self.annotate(offset, e))?;
        Ok(rec)
    }

    fn annotate(&self, offset: u64, err: Error) -> Error {
        match err {
            Error::Truncated => Error::Truncated,
            other => Error::InvalidRecord { segment_id: self.id, offset, reason: other.to_string() },
        }
    }

    #[cfg(unix)]
    fn pread_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_log.read_exact_at(buf, offset)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn pread_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.read_log.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Sequential scan of this segment's `.log`, from offset 0 to EOF.
    /// Stops cleanly (no error) on a truncated trailing record.
    pub fn scan(&self) -> Result<Scan> {
        let file = self.read_log.try_clone()?;
        let file_len = file.metadata()?.len();
        Ok(Scan { file, pos: 0, file_len, segment_id: self.id })
    }

    fn count_scan(path: &Path, segment_id: u64) -> Result<(u64, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut scan = Scan { file, pos: 0, file_len, segment_id };
        let mut entries = 0u64;
        while let Some(item) = scan.next() {
            item?;
            entries += 1;
        }
        Ok((entries, scan.pos))
    }

    /// Seals the segment: no further appends accepted, write handles are
    /// flushed and dropped, and `.hint` is persisted one last time.
    /// Idempotent.
    pub fn seal(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.active.store(false, Ordering::Release);
        let mut guard = self.writer.lock().unwrap();
        if let Some(mut writer) = guard.take() {
            writer.log.flush()?;
            writer.log.get_ref().sync_all()?;
            writer.index.flush()?;
            writer.index.get_ref().sync_all()?;
        }
        drop(guard);
        self.persist_hint()?;
        log::info!("sealed segment {}", self.id);
        Ok(())
    }

    /// Flushes and fsyncs the active segment's log and index without
    /// sealing it, used by the periodic background fsync task.
    pub fn sync(&self) -> Result<()> {
        let mut guard = self.writer.lock().unwrap();
        if let Some(writer) = guard.as_mut() {
            writer.log.flush()?;
            writer.log.get_ref().sync_all()?;
            writer.index.flush()?;
            writer.index.get_ref().sync_all()?;
        }
        drop(guard);
        self.last_synced_at_ms.store(now_ms(), Ordering::Release);
        self.persist_hint()?;
        Ok(())
    }

    /// Rewrites `.log.index` from scratch, derived from `scan()`.
    pub fn rebuild_index(&self) -> Result<()> {
        let tmp_path = {
            let mut p = index_path(&self.dir, self.id);
            p.set_extension("index.tmp");
            p
        };
        let mut tmp = BufWriter::new(OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?);
        for item in self.scan()? {
            let (offset, rec) = item?;
            let key_size = rec.key.as_bytes().len() as u32;
            let value_size = if rec.tombstone { 0 } else { rec.value.len() as u32 };
            let entry = IndexEntry {
                key: rec.key,
                segment_id: self.id,
                offset,
                framed_size: record::framed_size(key_size, value_size) as u64,
                timestamp: rec.timestamp,
                tombstone: rec.tombstone,
            };
            tmp.write_all(format_index_line(&entry).as_bytes())?;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, index_path(&self.dir, self.id))?;
        Ok(())
    }

    /// Parses `.log.index` into entries, or `None` if it is missing, empty,
    /// truncated, or contains a malformed line (the caller falls back to
    /// `scan()`).
    pub fn load_index(&self) -> Option<Vec<IndexEntry>> {
        let path = index_path(&self.dir, self.id);
        let contents = std::fs::read_to_string(&path).ok()?;
        if contents.is_empty() {
            return None;
        }
        let mut entries = Vec::new();
        for line in contents.lines() {
            entries.push(parse_index_line(line)?);
        }
        Some(entries)
    }

    fn load_hint(path: &Path) -> Option<Hint> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Atomically persists `.hint`: write to `.hint.tmp`, fsync, rename.
    fn persist_hint(&self) -> Result<()> {
        let hint = Hint {
            id: self.id,
            path: log_path(&self.dir, self.id).to_string_lossy().into_owned(),
            size: self.size.load(Ordering::Acquire),
            entries: self.entries.load(Ordering::Acquire),
            max_size: self.max_size,
            max_entries: self.max_entries,
            active: self.is_active() as u8,
            closed: self.is_closed() as u8,
            created_at_ms: self.created_at_ms,
            last_synced_at_ms: self.last_synced_at_ms.load(Ordering::Acquire),
        };
        let tmp_path = {
            let mut p = hint_path(&self.dir, self.id);
            p.set_extension("hint.tmp");
            p
        };
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(serde_json::to_vec_pretty(&hint)?.as_slice())?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, hint_path(&self.dir, self.id))?;
        Ok(())
    }
}

/// Lazy, sequential walk of a segment's `.log`.
pub struct Scan {
    file: File,
    pos: u64,
    file_len: u64,
    segment_id: u64,
}

impl Iterator for Scan {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.file_len {
            return None;
        }
        // `self.pos` is left untouched on every early return below: it
        // already marks the last valid record boundary, which is exactly
        // the length callers should truncate a crash-damaged log back to.
        let mut header_buf = [0u8; HEADER_LEN];
        if !read_at_best_effort(&self.file, self.pos, &mut header_buf) {
            return None; // partial header at EOF: discard, stop cleanly
        }
        let header = match record::decode_header(&header_buf) {
            Ok(h) => h,
            Err(_) => return None,
        };
        let total = record::framed_size(header.key_size, header.value_size);
        if self.pos + total as u64 > self.file_len {
            return None; // partial trailing record: discard, stop cleanly
        }
        let mut buf = vec![0u8; total];
        if !read_at_best_effort(&self.file, self.pos, &mut buf) {
            return None;
        }
        match record::decode(&buf) {
            Ok((rec, consumed)) => {
                let offset = self.pos;
                self.pos += consumed as u64;
                Some(Ok((offset, rec)))
            }
            Err(err) => Some(Err(Error::InvalidRecord {
                segment_id: self.segment_id,
                offset: self.pos,
                reason: err.to_string(),
            })),
        }
    }
}

#[cfg(unix)]
fn read_at_best_effort(file: &File, offset: u64, buf: &mut [u8]) -> bool {
    file.read_exact_at(buf, offset).is_ok()
}

#[cfg(not(unix))]
fn read_at_best_effort(file: &File, offset: u64, buf: &mut [u8]) -> bool {
    use std::io::{Read, Seek, SeekFrom};
    let Ok(mut file) = file.try_clone() else { return false };
    file.seek(SeekFrom::Start(offset)).is_ok() && file.read_exact(buf).is_ok()
}

/// A snapshot of on-disk segment ids discovered under `dir`, ascending.
pub fn discover_segment_ids(dir: &Path) -> Result<BTreeMap<u64, PathBuf>> {
    let mut ids = BTreeMap::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        let Some(stripped) = name.strip_prefix("segment_") else { continue };
        let Some(id_str) = stripped.strip_suffix(".log") else { continue };
        if let Ok(id) = id_str.parse::<u64>() {
            ids.insert(id, path);
        }
    }
    Ok(ids)
}
