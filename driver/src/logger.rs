//! A small stderr logger configured from `RVOPT_LOG`.
//!
//! The value is either a bare level (`RVOPT_LOG=debug`) or a comma-separated
//! list of `component=level` entries matched by prefix against the log
//! target, which uses the `component:topic` convention (`pass:dne`,
//! `conversion:construct`).

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

struct Directive {
    prefix: String,
    level: LevelFilter,
}

pub struct Logger {
    default: LevelFilter,
    directives: Vec<Directive>,
}

impl Logger {
    fn parse(spec: &str) -> Self {
        let mut default = LevelFilter::Warn;
        let mut directives = Vec::new();
        for entry in spec.split(',').filter(|e| !e.trim().is_empty()) {
            match entry.split_once('=') {
                Some((prefix, level)) => {
                    if let Ok(level) = level.trim().parse() {
                        directives.push(Directive {
                            prefix: prefix.trim().to_string(),
                            level,
                        });
                    }
                }
                None => {
                    if let Ok(level) = entry.trim().parse() {
                        default = level;
                    }
                }
            }
        }
        Self {
            default,
            directives,
        }
    }

    fn filter_for(&self, target: &str) -> LevelFilter {
        self.directives
            .iter()
            .find(|directive| target.starts_with(&directive.prefix))
            .map(|directive| directive.level)
            .unwrap_or(self.default)
    }

    fn max_level(&self) -> LevelFilter {
        self.directives
            .iter()
            .map(|directive| directive.level)
            .chain(std::iter::once(self.default))
            .max()
            .unwrap_or(LevelFilter::Warn)
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.filter_for(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = match record.level() {
            Level::Warn | Level::Error => {
                writeln!(stderr, "rvopt: {}: {}", record.level(), record.args())
            }
            _ => writeln!(stderr, "[{}] {}", record.target(), record.args()),
        };
    }

    fn flush(&self) {}
}

/// Install the logger from the `RVOPT_LOG` environment variable.
pub fn install() {
    let spec = std::env::var("RVOPT_LOG").unwrap_or_default();
    let logger = Logger::parse(&spec);
    let max = logger.max_level();
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max);
    }
}
