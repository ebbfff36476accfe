//! The segment manager: discovers segments on open, holds exactly one
//! active segment, rotates on threshold, and routes reads by segment id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::record::{self, Record};
use crate::segment::{self, Segment};

pub struct SegmentManager {
    dir: PathBuf,
    segments: BTreeMap<u64, Arc<Segment>>,
    active_id: u64,
    options: Arc<Options>,
}

impl SegmentManager {
    /// Discovers existing `segment_<id>.log` files, sorts by id ascending,
    /// reopens each as sealed except the highest-id one. The highest-id
    /// segment is reopened as active if it is still below both thresholds;
    /// otherwise it is sealed and a fresh active segment is created at
    /// `max(id) + 1`. An empty directory gets a fresh segment 0.
    pub fn open(dir: &Path, options: Arc<Options>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let ids = segment::discover_segment_ids(dir)?;
        let mut segments = BTreeMap::new();

        if ids.is_empty() {
            let segment = Segment::create(dir, 0, &options)?;
            segments.insert(0, Arc::new(segment));
            return Ok(Self { dir: dir.to_path_buf(), segments, active_id: 0, options });
        }

        let mut id_list: Vec<u64> = ids.keys().copied().collect();
        id_list.sort_unstable();
        let highest = *id_list.last().unwrap();

        for &id in &id_list {
            if id != highest {
                let segment = Segment::open_existing(dir, id, &options, false)?;
                segments.insert(id, Arc::new(segment));
            }
        }

        let candidate = Segment::open_existing(dir, highest, &options, true)?;
        let active_id = if candidate.size() >= options.max_segment_size
            || candidate.entries() >= options.max_entries_per_segment
        {
            candidate.seal()?;
            segments.insert(highest, Arc::new(candidate));
            let new_id = highest + 1;
            let fresh = Segment::create(dir, new_id, &options)?;
            segments.insert(new_id, Arc::new(fresh));
            new_id
        } else {
            segments.insert(highest, Arc::new(candidate));
            highest
        };

        log::info!("opened {} segment(s) under {}, active segment is {active_id}", segments.len(), dir.display());
        Ok(Self { dir: dir.to_path_buf(), segments, active_id, options })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    /// Segments in ascending id order, for recovery.
    pub fn segments_ascending(&self) -> impl Iterator<Item = (&u64, &Arc<Segment>)> {
        self.segments.iter()
    }

    pub fn segment(&self, id: u64) -> Option<Arc<Segment>> {
        self.segments.get(&id).cloned()
    }

    fn active(&self) -> Arc<Segment> {
        self.segments.get(&self.active_id).expect("active segment must always be present").clone()
    }

    /// Encodes and appends a record through the active segment, rotating at
    /// most once if it doesn't fit. Returns where it landed, plus the
    /// `(sealed_id, new_active_id)` pair if a rotation happened.
    pub fn append(
        &mut self,
        key: &str,
        value: &[u8],
        timestamp: u64,
        tombstone: bool,
    ) -> Result<(u64, u64, Option<(u64, u64)>)> {
        let framed = record::encode(timestamp, tombstone, key, value, self.options.max_key_size, self.options.max_value_size)?;

        let active = self.active();
        match active.append(&framed, key, timestamp, tombstone) {
            Ok(offset) => return Ok((active.id(), offset, None)),
            Err(Error::SegmentFull) => {}
            Err(e) => return Err(e),
        }

        let sealed_id = active.id();
        let new_id = self.rotate()?;
        let active = self.active();
        match active.append(&framed, key, timestamp, tombstone) {
            Ok(offset) => {
                log::debug!("segment {sealed_id} rotated to {new_id} to fit record for {key:?}");
                Ok((active.id(), offset, Some((sealed_id, new_id))))
            }
            Err(Error::SegmentFull) => {
                Err(Error::OversizedRecord { framed_size: framed.len(), max_segment_size: self.options.max_segment_size })
            }
            Err(e) => Err(e),
        }
    }

    /// Seals the current active segment and opens a new one at `id + 1`.
    pub fn rotate(&mut self) -> Result<u64> {
        let old = self.active();
        old.seal()?;
        let new_id = old.id() + 1;
        let fresh = Segment::create(&self.dir, new_id, &self.options)?;
        self.segments.insert(new_id, Arc::new(fresh));
        self.active_id = new_id;
        log::info!("rotated segment {} -> {new_id}", old.id());
        Ok(new_id)
    }

    /// Reads a record at `(segment_id, offset)`.
    pub fn read(&self, segment_id: u64, offset: u64) -> Result<Record> {
        let segment = self.segments.get(&segment_id).ok_or_else(|| Error::InvalidRecord {
            segment_id,
            offset,
            reason: "segment not found".to_string(),
        })?;
        segment.read_at(offset)
    }

    /// Flushes and fsyncs the active segment, used by the periodic
    /// background fsync task. Brief: does not touch sealed segments, which
    /// are already immutable and synced at seal time.
    pub fn sync_active(&self) -> Result<()> {
        self.active().sync()
    }

    /// Seals the active segment and drops all write handles.
    pub fn close(&mut self) -> Result<()> {
        self.active().seal()?;
        for segment in self.segments.values() {
            segment.seal()?;
        }
        Ok(())
    }
}
