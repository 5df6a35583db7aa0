//! Session configuration shared by the pass driver and the passes: output
//! selection and statistics collection.

mod statistics;

use std::path::PathBuf;

pub use self::statistics::{Statistics, StatisticsDescriptor, StatisticsId, Timer};

/// The format the lowered module is emitted in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Textual module IR handed to the external back-end.
    #[default]
    Llvm,
    /// Internal graph dump.
    Xml,
}

/// Configuration of a single run of the middle-end.
#[derive(Debug, Default)]
pub struct Session {
    /// The input module path.
    pub input: PathBuf,
    /// Where the lowered module is written; stdout when absent.
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub statistics: StatisticsDescriptor,
    /// Replication factor of the loop-unrolling pass.
    pub unroll_factor: usize,
}

impl Session {
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            unroll_factor: 4,
            ..Self::default()
        }
    }
}
