//! Slice routing
//!
//! The row id space is cut into contiguous, fixed-width slices. Routing is a
//! pure function of the row id, so every node computes the same owner for a
//! row without coordination.

/// Number of row ids held by one slice
pub const SLICE_WIDTH: u64 = 1 << 20;

/// Slice owning `row_id`
#[inline]
pub fn slice_of(row_id: u64) -> u64 {
    slice_of_width(row_id, SLICE_WIDTH)
}

/// Slice owning `row_id` for an arbitrary slice width
///
/// `width` must be non-zero.
#[inline]
pub fn slice_of_width(row_id: u64, width: u64) -> u64 {
    row_id / width
}
