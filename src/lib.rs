//! A user-space M:N thread runtime: cooperative threads multiplexed over a
//! cohort of forked worker processes that share one `MAP_SHARED` address
//! space, with page ownership migrated between workers on demand via
//! `SIGSEGV` trapping rather than explicit message passing.
//!
//! Grounded throughout in `examples/original_source/` (`plasma-umass/proto`,
//! the C++ runtime this crate reimplements) -- see `DESIGN.md` for the
//! module-by-module grounding ledger and the resolved Open Questions.

pub mod abi;
pub mod arena;
pub mod config;
pub mod error;
pub mod heap;
pub mod list;
pub mod page;
pub mod process;
pub mod queue;
pub mod runtime;
pub mod sched;
pub mod signal;
pub mod sync;
pub mod thread;
pub mod types;
