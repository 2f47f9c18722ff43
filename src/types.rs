//! Shared identifier types used across the cohort.

/// Index of a worker process within the cohort, `0..cores`.
pub type CoreId = usize;

/// Cohort-unique thread identifier.
pub type Tid = u32;

/// Sentinel `CoreId` meaning "no owner" in the page-owner table.
pub const CORE_NONE: u32 = u32::MAX;

/// Sentinel `Tid` meaning "no thread".
pub const TID_NONE: Tid = 0;
