use chrono::Local;
use log::{Level, LevelFilter, Log, SetLoggerError};

pub static TOURMALINE_LOGGER: TourmalineLogger = TourmalineLogger;

pub struct TourmalineLogger;

impl TourmalineLogger {
    /// Installs the logger as the global `log` backend.
    pub fn init(level: Level) -> Result<(), SetLoggerError> {
        log::set_logger(&TOURMALINE_LOGGER)?;
        log::set_max_level(match level {
            Level::Error => LevelFilter::Error,
            Level::Warn => LevelFilter::Warn,
            Level::Info => LevelFilter::Info,
            Level::Debug => LevelFilter::Debug,
            Level::Trace => LevelFilter::Trace,
        });
        Ok(())
    }
}

impl Log for TourmalineLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let now = Local::now();
            println!(
                "{} {} {}",
                now.format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
