//! Synchronization primitives built on the scheduler's yield primitives
//! (design §4.5-4.7).

pub mod barrier;
pub mod condvar;
pub mod mutex;
pub mod spinlock;

pub use barrier::Barrier;
pub use condvar::Condvar;
pub use mutex::Mutex;
pub use spinlock::RawSpinlock;
