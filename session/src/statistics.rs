use std::{
    fmt::Write as _,
    fs::OpenOptions,
    io::Write as _,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use rustc_hash::FxHashSet;

/// Identifies the statistics a pass or pipeline stage may emit. Only ids
/// selected on the command line are written to the statistics file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatisticsId {
    Aggregation,
    Annotation,
    RvsdgConstruction,
    RvsdgDestruction,
    CommonNodeElimination,
    DeadNodeElimination,
    FunctionInlining,
    InvariantValueRedirection,
    PullNodes,
    PushNodes,
    ReduceNodes,
    ThetaGammaInversion,
    LoopUnrolling,
    SteensgaardAnalysis,
    BasicEncoderEncoding,
}

impl StatisticsId {
    /// The record prefix used in the statistics file.
    pub fn label(&self) -> &'static str {
        match self {
            StatisticsId::Aggregation => "AGGREGATION",
            StatisticsId::Annotation => "ANNOTATION",
            StatisticsId::RvsdgConstruction => "RVSDGCONSTRUCTION",
            StatisticsId::RvsdgDestruction => "RVSDGDESTRUCTION",
            StatisticsId::CommonNodeElimination => "CNE",
            StatisticsId::DeadNodeElimination => "DNE",
            StatisticsId::FunctionInlining => "ILN",
            StatisticsId::InvariantValueRedirection => "IVR",
            StatisticsId::PullNodes => "PULL",
            StatisticsId::PushNodes => "PUSH",
            StatisticsId::ReduceNodes => "RED",
            StatisticsId::ThetaGammaInversion => "IVT",
            StatisticsId::LoopUnrolling => "URL",
            StatisticsId::SteensgaardAnalysis => "STEENSGAARD",
            StatisticsId::BasicEncoderEncoding => "BASICENCODER",
        }
    }
}

/// One record of per-pass measurements: whitespace-separated `KEY VALUE`
/// pairs, written as a single line prefixed with the pass identifier.
#[derive(Debug)]
pub struct Statistics {
    id: StatisticsId,
    entries: Vec<(&'static str, String)>,
}

impl Statistics {
    pub fn new(id: StatisticsId) -> Self {
        Self {
            id,
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> StatisticsId {
        self.id
    }

    pub fn add(&mut self, key: &'static str, value: impl ToString) -> &mut Self {
        self.entries.push((key, value.to_string()));
        self
    }

    pub fn add_timing(&mut self, key: &'static str, duration: Duration) -> &mut Self {
        self.add(key, duration.as_nanos())
    }

    fn render(&self) -> String {
        let mut line = String::from(self.id.label());
        for (key, value) in &self.entries {
            let _ = write!(line, " {key} {value}");
        }
        line
    }
}

/// A simple wall-clock timer for pass measurements.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Decides which statistics are collected and appends the selected records
/// to the statistics file, one line per record.
#[derive(Debug, Default)]
pub struct StatisticsDescriptor {
    path: Option<PathBuf>,
    enabled: FxHashSet<StatisticsId>,
}

impl StatisticsDescriptor {
    pub fn new(path: Option<PathBuf>, enabled: impl IntoIterator<Item = StatisticsId>) -> Self {
        Self {
            path,
            enabled: enabled.into_iter().collect(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self, id: StatisticsId) -> bool {
        self.enabled.contains(&id)
    }

    /// Append the record to the statistics file if its id was selected.
    /// Failures to write are logged, never fatal.
    pub fn print(&self, statistics: &Statistics) {
        if !self.is_enabled(statistics.id()) {
            return;
        }
        let Some(path) = &self.path else {
            return;
        };
        let line = statistics.render();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(error) = result {
            log::warn!(target: "session:statistics", "failed to write statistics: {error}");
        }
    }
}
