//! Fragments: the storage unit for one slice of one view
//!
//! The view layer only depends on the [`Fragment`] trait, so the bitmap
//! encoding behind it can be swapped without touching the registry.
//!
//! [`FileFragment`] is the bundled backend: an append-only operation log
//! replayed into memory on open.
//!
//! ```text
//! Fragment file (one record per changed bit):
//! [op: u8][bitmap_id: u64 LE][row_id: u64 LE]   ← 17 bytes
//!   op = 1 → set, op = 0 → clear
//! ```
//!
//! A partial record at the end of the log (an interrupted append) is cut off
//! on open. Whole records with an unknown op code are corruption.

use super::slice::slice_of;
use crate::attr::AttrStore;
use crate::error::{Error, Result};
use crate::stats::{NopStatsClient, StatsClient};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Contract between a view and the partition units it manages
pub trait Fragment: Send + Sync + 'static {
    /// Build an unopened fragment. Must not touch the filesystem.
    fn new(path: PathBuf, db: &str, frame: &str, view: &str, slice: u64) -> Self
    where
        Self: Sized;

    /// Load or initialize on-disk state
    fn open(&mut self) -> Result<()>;

    /// Release resources
    fn close(&self) -> Result<()>;

    /// Slice this fragment was constructed for
    fn slice(&self) -> u64;

    /// Set a bit, returning whether it changed
    fn set_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool>;

    /// Clear a bit, returning whether it changed
    fn clear_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool>;

    fn set_bitmap_attr_store(&mut self, store: Option<Arc<AttrStore>>);

    fn set_stats(&mut self, stats: Arc<dyn StatsClient>);

    fn set_log_span(&mut self, span: Span);
}

const RECORD_SIZE: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Clear = 0,
    Set = 1,
}

impl Op {
    fn metric(self) -> &'static str {
        match self {
            Op::Clear => "clear_bit",
            Op::Set => "set_bit",
        }
    }
}

fn encode(op: Op, bitmap_id: u64, row_id: u64) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    record[0] = op as u8;
    record[1..9].copy_from_slice(&bitmap_id.to_le_bytes());
    record[9..17].copy_from_slice(&row_id.to_le_bytes());
    record
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[derive(Default)]
struct FragmentState {
    /// Open log handle; `None` while unopened or closed
    file: Option<File>,
    /// (bitmap_id, row_id) pairs currently set
    bits: BTreeSet<(u64, u64)>,
}

/// Log-structured fragment stored in a single file
pub struct FileFragment {
    path: PathBuf,
    db: String,
    frame: String,
    view: String,
    slice: u64,

    state: Mutex<FragmentState>,

    bitmap_attr_store: Option<Arc<AttrStore>>,
    stats: Arc<dyn StatsClient>,
    span: Span,
}

impl FileFragment {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn bitmap_attr_store(&self) -> Option<&Arc<AttrStore>> {
        self.bitmap_attr_store.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Snapshot of every set bit as (bitmap_id, row_id), ordered
    pub fn bits(&self) -> Vec<(u64, u64)> {
        self.state.lock().bits.iter().copied().collect()
    }

    /// Row ids set in `bitmap_id`, ascending
    pub fn bitmap(&self, bitmap_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .bits
            .range((bitmap_id, 0)..=(bitmap_id, u64::MAX))
            .map(|&(_, row)| row)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().bits.is_empty()
    }

    /// Rebuilds the bit set from whole records; `log.len()` must be a
    /// multiple of `RECORD_SIZE`
    fn replay(&self, log: &[u8]) -> Result<BTreeSet<(u64, u64)>> {
        let mut bits = BTreeSet::new();
        for (i, record) in log.chunks_exact(RECORD_SIZE).enumerate() {
            let key = (read_u64(&record[1..9]), read_u64(&record[9..17]));
            match record[0] {
                1 => {
                    bits.insert(key);
                }
                0 => {
                    bits.remove(&key);
                }
                op => {
                    return Err(Error::CorruptFragment(format!(
                        "{}: unknown op {} in record {}",
                        self.path.display(),
                        op,
                        i
                    )))
                }
            }
        }
        Ok(bits)
    }

    fn mutate(&self, op: Op, bitmap_id: u64, row_id: u64) -> Result<bool> {
        if slice_of(row_id) != self.slice {
            return Err(Error::InvalidArgument(format!(
                "row {} is outside slice {}",
                row_id, self.slice
            )));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let file = state
            .file
            .as_mut()
            .ok_or(Error::FragmentClosed(self.slice))?;

        let key = (bitmap_id, row_id);
        let present = state.bits.contains(&key);
        if present == (op == Op::Set) {
            return Ok(false);
        }

        file.write_all(&encode(op, bitmap_id, row_id))?;
        match op {
            Op::Set => state.bits.insert(key),
            Op::Clear => state.bits.remove(&key),
        };

        self.stats.count(op.metric(), 1);
        debug!(parent: &self.span, slice = self.slice, bitmap_id, row_id, op = ?op, "Bit changed");
        Ok(true)
    }
}

impl Fragment for FileFragment {
    fn new(path: PathBuf, db: &str, frame: &str, view: &str, slice: u64) -> Self {
        Self {
            path,
            db: db.to_string(),
            frame: frame.to_string(),
            view: view.to_string(),
            slice,
            state: Mutex::new(FragmentState::default()),
            bitmap_attr_store: None,
            stats: Arc::new(NopStatsClient),
            span: Span::none(),
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;

        let mut log = Vec::new();
        file.read_to_end(&mut log)?;

        let torn = log.len() % RECORD_SIZE;
        if torn != 0 {
            let keep = log.len() - torn;
            warn!(
                parent: &self.span,
                path = ?self.path,
                slice = self.slice,
                trailing_bytes = torn,
                "Truncating partial record at end of fragment log"
            );
            file.set_len(keep as u64)?;
            log.truncate(keep);
        }
        let bits = self.replay(&log)?;

        debug!(
            parent: &self.span,
            path = ?self.path,
            slice = self.slice,
            bits = bits.len(),
            "Opened fragment"
        );

        let state = self.state.get_mut();
        state.bits = bits;
        state.file = Some(file);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.bits.clear();
        if let Some(file) = state.file.take() {
            file.sync_all()?;
            debug!(parent: &self.span, slice = self.slice, "Closed fragment");
        }
        Ok(())
    }

    fn slice(&self) -> u64 {
        self.slice
    }

    fn set_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool> {
        self.mutate(Op::Set, bitmap_id, row_id)
    }

    fn clear_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool> {
        self.mutate(Op::Clear, bitmap_id, row_id)
    }

    fn set_bitmap_attr_store(&mut self, store: Option<Arc<AttrStore>>) {
        self.bitmap_attr_store = store;
    }

    fn set_stats(&mut self, stats: Arc<dyn StatsClient>) {
        self.stats = stats;
    }

    fn set_log_span(&mut self, span: Span) {
        self.span = span;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MemoryStatsClient;
    use crate::storage::slice::SLICE_WIDTH;

    fn open_fragment(dir: &Path, slice: u64) -> Result<FileFragment> {
        let mut frag = FileFragment::new(dir.join(slice.to_string()), "d", "f", "standard", slice);
        frag.open()?;
        Ok(frag)
    }

    #[test]
    fn test_set_and_clear_bit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frag = open_fragment(dir.path(), 0)?;

        assert!(frag.set_bit(1, 10)?);
        assert!(!frag.set_bit(1, 10)?);
        assert!(frag.set_bit(1, 20)?);
        assert!(frag.set_bit(2, 10)?);
        assert_eq!(frag.bitmap(1), vec![10, 20]);

        assert!(frag.clear_bit(1, 10)?);
        assert!(!frag.clear_bit(1, 10)?);
        assert_eq!(frag.bitmap(1), vec![20]);
        assert_eq!(frag.len(), 2);
        Ok(())
    }

    #[test]
    fn test_log_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let row = 2 * SLICE_WIDTH + 5;
        {
            let frag = open_fragment(dir.path(), 2)?;
            frag.set_bit(7, row)?;
            frag.set_bit(7, row + 1)?;
            frag.clear_bit(7, row)?;
            frag.close()?;
        }

        let frag = open_fragment(dir.path(), 2)?;
        assert_eq!(frag.bits(), vec![(7, row + 1)]);
        Ok(())
    }

    #[test]
    fn test_partial_tail_record_is_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("0");
        let mut log = encode(Op::Set, 4, 9).to_vec();
        log.extend_from_slice(&encode(Op::Set, 4, 10)[..5]);
        std::fs::write(&path, &log)?;

        let mut frag = FileFragment::new(path.clone(), "d", "f", "standard", 0);
        frag.open()?;
        assert_eq!(frag.bits(), vec![(4, 9)]);
        assert_eq!(std::fs::metadata(&path)?.len(), RECORD_SIZE as u64);

        // New appends land on a record boundary.
        assert!(frag.set_bit(4, 11)?);
        frag.close()?;

        let mut frag = FileFragment::new(path, "d", "f", "standard", 0);
        frag.open()?;
        assert_eq!(frag.bits(), vec![(4, 9), (4, 11)]);
        Ok(())
    }

    #[test]
    fn test_log_shorter_than_a_record_opens_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("0"), [1u8, 2, 3])?;

        let mut frag = FileFragment::new(dir.path().join("0"), "d", "f", "standard", 0);
        frag.open()?;
        assert!(frag.is_empty());
        assert!(frag.is_open());
        Ok(())
    }

    #[test]
    fn test_unknown_op_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut record = encode(Op::Set, 1, 1);
        record[0] = 9;
        std::fs::write(dir.path().join("0"), record)?;

        let mut frag = FileFragment::new(dir.path().join("0"), "d", "f", "standard", 0);
        assert!(matches!(frag.open(), Err(Error::CorruptFragment(_))));
        Ok(())
    }

    #[test]
    fn test_row_outside_slice_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frag = open_fragment(dir.path(), 1)?;

        let err = frag.set_bit(1, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(frag.is_empty());
        Ok(())
    }

    #[test]
    fn test_mutation_after_close_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frag = open_fragment(dir.path(), 0)?;
        frag.close()?;
        frag.close()?;

        assert!(matches!(frag.set_bit(1, 1), Err(Error::FragmentClosed(0))));
        Ok(())
    }

    #[test]
    fn test_unopened_fragment_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("4");
        let frag = FileFragment::new(path.clone(), "d", "f", "standard", 4);
        assert!(!path.exists());
        assert!(matches!(
            frag.set_bit(1, 4 * SLICE_WIDTH),
            Err(Error::FragmentClosed(4))
        ));
    }

    #[test]
    fn test_counts_only_changes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let stats = MemoryStatsClient::new();
        let mut frag = FileFragment::new(dir.path().join("0"), "d", "f", "standard", 0);
        frag.set_stats(stats.with_tags(&["slice:0"]));
        frag.open()?;

        frag.set_bit(1, 1)?;
        frag.set_bit(1, 1)?;
        frag.clear_bit(1, 1)?;
        frag.clear_bit(1, 2)?;

        assert_eq!(stats.count_for("set_bit", &["slice:0"]), 1);
        assert_eq!(stats.count_for("clear_bit", &["slice:0"]), 1);
        Ok(())
    }
}
