//! # Logger
//!
//! Sets up the `log` facade for an executable. Records are written to stdout with coloured level
//! tags, and to the session log file without colour.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::fmt;

use colored::{ColoredString, Colorize};
use fern::{Dispatch, FormatCallback};
use log::{info, Record};
use thiserror::Error;

use crate::session::{self, Session};

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Minimum log level must include `INFO`, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must be `Info` or more verbose. Records from the tree growth modules are capped at
/// `Debug`, since one search emits a record per iteration.
///
/// Must only be called once per process.
pub fn logger_init(min_level: LevelFilter, session: &Session) -> Result<(), LoggerInitError> {
    if min_level < LevelFilter::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file =
        fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFileInitError)?;

    let search_level = min_level.min(LevelFilter::Debug);

    Dispatch::new()
        .level(min_level)
        .level_for("gbp_lib::planner::rrt", search_level)
        .level_for("gbp_lib::planner::rrt_connect", search_level)
        .chain(
            Dispatch::new()
                .format(|out, message, record| {
                    format_record(out, message, record, level_tag(record.level()))
                })
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .format(|out, message, record| {
                    format_record(out, message, record, record.level().to_string().normal())
                })
                .chain(log_file),
        )
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Prefix the message with the session time and level, and the target for debug records.
fn format_record(out: FormatCallback, message: &fmt::Arguments, record: &Record, tag: ColoredString) {
    let elapsed = session::get_elapsed_seconds();

    if record.level() > log::Level::Info {
        out.finish(format_args!(
            "[{:10.6} {:5}] {}: {}",
            elapsed,
            tag,
            record.target(),
            message
        ))
    } else {
        out.finish(format_args!("[{:10.6} {:5}] {}", elapsed, tag, message))
    }
}

fn level_tag(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRACE".dimmed().italic(),
        log::Level::Debug => "DEBUG".dimmed(),
        log::Level::Info => "INFO".normal(),
        log::Level::Warn => "WARN".yellow(),
        log::Level::Error => "ERROR".red().bold(),
    }
}
