//! Runtime configuration.
//!
//! Holds every tunable named in the external-interfaces section of the
//! design: core count, shared-heap sizing, stack sizes, and the file
//! buffer size. Defaults match the constants the original runtime compiles
//! in as `#define`s; the demo binary overrides them from the command line
//! via [`clap`] so the cohort can be exercised at non-default sizes.

use clap::Parser;

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Parser)]
#[command(name = "mnthread-demo", about = "M:N thread runtime demo harness")]
pub struct RuntimeConfig {
    /// Number of worker processes (cores) in the cohort.
    #[arg(long, default_value_t = 4)]
    pub cores: usize,

    /// Size of the shared heap region, in bytes.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub heap_size: usize,

    /// Size of the shared globals region, in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    pub globals_size: usize,

    /// Chunk size a per-core heap carves from the shared heap at a time.
    #[arg(long, default_value_t = 256 * 1024)]
    pub chunk_size: usize,

    /// Maximum number of live threads across the cohort.
    #[arg(long, default_value_t = 4096)]
    pub max_threads: usize,

    /// Stack size for each user thread, in bytes.
    #[arg(long, default_value_t = 256 * 1024)]
    pub thread_stack_size: usize,

    /// Stack size for each per-core scheduler thread, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub scheduler_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            cores: 4,
            heap_size: 64 * 1024 * 1024,
            globals_size: 1024 * 1024,
            chunk_size: 256 * 1024,
            max_threads: 4096,
            thread_stack_size: 256 * 1024,
            scheduler_stack_size: 64 * 1024,
        }
    }
}

impl RuntimeConfig {
    pub fn total_pages(&self, region_size: usize) -> usize {
        region_size.div_ceil(PAGE_SIZE)
    }
}
