//! Views: slice-partitioned fragment registries
//!
//! A view holds the fragments of one orientation of a frame. Fragments are
//! keyed by slice and materialized lazily on the first write that routes to
//! them. On open, the `fragments/` directory is the catalog: every entry whose
//! name parses as a decimal slice number is reopened, anything else is left
//! alone.
//!
//! ```text
//! <view root>/
//!   └─→ fragments/
//!        ├─→ 0
//!        ├─→ 3
//!        └─→ 7
//! ```

use super::fragment::{FileFragment, Fragment};
use super::slice::slice_of;
use crate::attr::AttrStore;
use crate::error::{Error, Result};
use crate::stats::{NopStatsClient, StatsClient};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

/// Standard orientation: rows are bitmaps, columns are row ids
pub const VIEW_STANDARD: &str = "standard";

/// Inverse orientation: row and column roles swapped
pub const VIEW_INVERSE: &str = "inverse";

/// Name of the directory holding fragment files
const FRAGMENTS_DIR: &str = "fragments";

/// Counter bumped each time a fragment is materialized (reopened or created)
const FRAGMENTS_OPENED: &str = "fragments_opened";

/// Returns true if `name` denotes an inverse-orientation view
pub fn is_view_inverted(name: &str) -> bool {
    name.starts_with(VIEW_INVERSE)
}

/// Slice number encoded by a fragment file name
///
/// Only the exact form `fragment_path` writes is accepted: ASCII digits with
/// no sign and no leading zeros. Anything else would resolve to a different
/// file than the one on disk.
fn parse_slice_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewState {
    Unopened,
    Opening,
    Open,
    Closed,
}

/// A container for frame data, partitioned by slice
///
/// `open` must complete before the view is shared between threads: fragment
/// discovery is not serialized against other callers. Every other operation
/// takes the registry lock and is safe to call concurrently.
pub struct View<F: Fragment = FileFragment> {
    path: PathBuf,
    db: String,
    frame: String,
    name: String,

    /// Fragments by slice
    fragments: Mutex<HashMap<u64, Arc<F>>>,
    state: Mutex<ViewState>,

    stats: Arc<dyn StatsClient>,
    bitmap_attr_store: Option<Arc<AttrStore>>,
    log_span: Span,
}

impl<F: Fragment> View<F> {
    /// Returns an unopened view
    pub fn new<P: AsRef<Path>>(path: P, db: &str, frame: &str, name: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: db.to_string(),
            frame: frame.to_string(),
            name: name.to_string(),
            fragments: Mutex::new(HashMap::new()),
            state: Mutex::new(ViewState::Unopened),
            stats: Arc::new(NopStatsClient),
            bitmap_attr_store: None,
            log_span: Span::none(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsClient>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_bitmap_attr_store(mut self, store: Arc<AttrStore>) -> Self {
        self.bitmap_attr_store = Some(store);
        self
    }

    /// Span that view and fragment log events are attached to
    pub fn with_log_span(mut self, span: Span) -> Self {
        self.log_span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bitmap_attr_store(&self) -> Option<&Arc<AttrStore>> {
        self.bitmap_attr_store.as_ref()
    }

    /// Schema descriptor for this view
    pub fn info(&self) -> ViewInfo {
        ViewInfo {
            name: self.name.clone(),
        }
    }

    /// Opens the view and reloads its fragments from disk
    ///
    /// On failure the view is closed (best effort) and the original error is
    /// returned. Directories created along the way are kept.
    pub fn open(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ViewState::Unopened {
                return Err(Error::InvalidState(format!(
                    "view {} cannot be opened while {:?}",
                    self.name, *state
                )));
            }
            *state = ViewState::Opening;
        }

        let result = fs::create_dir_all(&self.path)
            .and_then(|_| fs::create_dir_all(self.fragments_dir()))
            .map_err(Error::from)
            .and_then(|_| self.open_fragments());

        match result {
            Ok(()) => {
                *self.state.lock() = ViewState::Open;
                info!(
                    parent: &self.log_span,
                    db = %self.db,
                    frame = %self.frame,
                    view = %self.name,
                    fragments = self.fragments.lock().len(),
                    "Opened view"
                );
                Ok(())
            }
            Err(e) => {
                let _ = self.close();
                Err(e)
            }
        }
    }

    /// Reopens every fragment found in the fragments directory
    fn open_fragments(&self) -> Result<()> {
        let entries = match fs::read_dir(self.fragments_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }

            // Entries that aren't slice numbers belong to someone else.
            let slice = match entry.file_name().to_str().and_then(parse_slice_name) {
                Some(slice) => slice,
                None => continue,
            };

            let mut frag = self.new_fragment(slice);
            frag.open().map_err(|e| Error::OpenFragment {
                slice,
                source: Box::new(e),
            })?;
            frag.set_bitmap_attr_store(self.bitmap_attr_store.clone());

            debug!(parent: &self.log_span, view = %self.name, slice, "Reopened fragment");
            self.fragments.lock().insert(frag.slice(), Arc::new(frag));
            self.stats.count(FRAGMENTS_OPENED, 1);
        }

        Ok(())
    }

    /// Closes the view and its fragments
    ///
    /// Every fragment gets a close attempt; individual failures are logged
    /// and dropped.
    pub fn close(&self) -> Result<()> {
        let mut fragments = self.fragments.lock();
        for (slice, frag) in fragments.iter() {
            if let Err(e) = frag.close() {
                warn!(parent: &self.log_span, view = %self.name, slice, error = %e, "Failed to close fragment");
            }
        }
        fragments.clear();

        let mut state = self.state.lock();
        if *state != ViewState::Closed {
            *state = ViewState::Closed;
            debug!(parent: &self.log_span, view = %self.name, "Closed view");
        }
        Ok(())
    }

    /// Highest slice with a registered fragment, or 0 when empty
    pub fn max_slice(&self) -> u64 {
        self.fragments.lock().keys().copied().max().unwrap_or(0)
    }

    /// Path to the fragment file for `slice`
    pub fn fragment_path(&self, slice: u64) -> PathBuf {
        self.fragments_dir().join(slice.to_string())
    }

    fn fragments_dir(&self) -> PathBuf {
        self.path.join(FRAGMENTS_DIR)
    }

    /// Registered fragment for `slice`, if any
    pub fn fragment(&self, slice: u64) -> Option<Arc<F>> {
        self.fragments.lock().get(&slice).cloned()
    }

    /// Snapshot of all registered fragments, unordered
    pub fn fragments(&self) -> Vec<Arc<F>> {
        self.fragments.lock().values().cloned().collect()
    }

    /// Returns the fragment for `slice`, creating and opening it if needed
    ///
    /// The registry lock is held across the fragment's open, so two callers
    /// can never materialize the same slice twice.
    pub fn create_fragment_if_not_exists(&self, slice: u64) -> Result<Arc<F>> {
        let mut fragments = self.fragments.lock();
        if let Some(frag) = fragments.get(&slice) {
            return Ok(Arc::clone(frag));
        }

        let mut frag = self.new_fragment(slice);
        frag.open()?;
        frag.set_bitmap_attr_store(self.bitmap_attr_store.clone());

        let frag = Arc::new(frag);
        fragments.insert(slice, Arc::clone(&frag));
        self.stats.count(FRAGMENTS_OPENED, 1);

        debug!(parent: &self.log_span, view = %self.name, slice, "Created fragment");
        Ok(frag)
    }

    fn new_fragment(&self, slice: u64) -> F {
        let mut frag = F::new(
            self.fragment_path(slice),
            &self.db,
            &self.frame,
            &self.name,
            slice,
        );
        let tag = format!("slice:{}", slice);
        frag.set_log_span(self.log_span.clone());
        frag.set_stats(self.stats.with_tags(&[tag.as_str()]));
        frag
    }

    /// Sets a bit within the view
    pub fn set_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool> {
        let frag = self.create_fragment_if_not_exists(slice_of(row_id))?;
        frag.set_bit(bitmap_id, row_id)
    }

    /// Clears a bit within the view
    pub fn clear_bit(&self, bitmap_id: u64, row_id: u64) -> Result<bool> {
        let frag = self.create_fragment_if_not_exists(slice_of(row_id))?;
        frag.clear_bit(bitmap_id, row_id)
    }
}

impl<F: Fragment> std::fmt::Debug for View<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("path", &self.path)
            .field("db", &self.db)
            .field("frame", &self.frame)
            .field("name", &self.name)
            .finish()
    }
}

// Views order by name for deterministic listings.
impl<F: Fragment> PartialEq for View<F> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<F: Fragment> Eq for View<F> {}

impl<F: Fragment> PartialOrd for View<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: Fragment> Ord for View<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Schema information for a view
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
}
