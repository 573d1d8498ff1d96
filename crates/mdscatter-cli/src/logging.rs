use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::prelude::*;

/// Crates whose events follow the requested verbosity. Everything else is capped at WARN.
const OWN_TARGETS: [&str; 2] = ["mdscatter", "mdscatter_cli"];

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    pub fn new(verbosity: u8, quiet: bool, file: Option<PathBuf>) -> Self {
        Self {
            level: level_filter(verbosity, quiet),
            file,
        }
    }

    fn targets(&self) -> Targets {
        OWN_TARGETS
            .iter()
            .fold(Targets::new().with_default(self.level.min(LevelFilter::WARN)), |t, target| {
                t.with_target(*target, self.level)
            })
    }
}

pub fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber: compact stderr output, plus a plain-text log file
/// that also records when each analysis phase span closes and how long it took.
pub fn setup_logging(settings: &LogSettings) -> Result<()> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(settings.targets());

    let file = settings
        .file
        .as_ref()
        .map(|path| -> Result<_> {
            let sink = File::create(path)?;
            Ok(fmt::layer()
                .with_writer(sink)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(settings.targets()))
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}
