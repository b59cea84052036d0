//! Storage layer
//!
//! # Architecture
//!
//! A frame's data is stored per orientation ("view"), and each view is split
//! into fixed-width slices of the row id space:
//!
//! ```text
//! View (standard | inverse*)
//!   └─→ Fragments (slice → Fragment)
//!        └─→ Bits (bitmap_id, row_id)
//! ```
//!
//! - `slice`: routing from row id to slice (`row_id / SLICE_WIDTH`)
//! - `fragment`: the `Fragment` contract and the log-structured `FileFragment`
//! - `view`: registry, lazy creation, discovery and lifecycle

pub mod fragment;
pub mod slice;
pub mod view;

pub use fragment::{FileFragment, Fragment};
pub use slice::{slice_of, slice_of_width, SLICE_WIDTH};
pub use view::{is_view_inverted, View, ViewInfo, VIEW_INVERSE, VIEW_STANDARD};
