//! Thread control blocks, the thread table, and spawn/join/exit (design
//! §4.4).

pub mod table;
pub mod tcb;

pub use table::{exit_current, join, spawn, ThreadTable};
pub use tcb::{Tcb, ThreadStatus};
