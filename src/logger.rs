//! # logger
//! `log` facade backend writing to fd 2; level follows the `verbosity`
//! option. Kept deliberately dumb so it stays usable from any runtime
//! context.
use log::{LevelFilter, Log, Metadata, Record};

use crate::asan_printf;

#[derive(Debug)]
pub struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        asan_printf!("==asan== {:<5} {}\n", record.level(), record.args());
    }

    fn flush(&self) {}
}

pub fn init(verbosity: u32) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // Lost race just means someone else (e.g. a test harness) owns logging.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
