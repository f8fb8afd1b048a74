// Must be used globally in root:
// #[macro_use] extern crate log;
// pub const CRATE_NAME: &str = module_path!();

use crate::CRATE_NAME;
use fern::colors::{Color, ColoredLevelConfig};
use humantime::format_rfc3339_seconds as timestamp;
use log::LevelFilter;
use std::fmt::Display;
use std::path::Path;
use std::time::SystemTime;

/// `2026-10-18 12:00:00`
fn now() -> String {
    timestamp(SystemTime::now())
        .to_string()
        .replace('T', " ")
        .replace('Z', "")
}

/// `timestamp - logger name - level - message`
fn line(target: &str, level: impl Display, message: impl Display) -> String {
    format!("{} - {} - {} - {}", now(), target, level, message)
}

fn dispatch(path: &Path, level: LevelFilter) -> Result<fern::Dispatch, std::io::Error> {
    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .debug(Color::Magenta)
        .trace(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Red);

    let stdout = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}",
                line(record.target(), colors.color(record.level()), message)
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                line(record.target(), record.level(), message)
            ))
        })
        .chain(fern::log_file(path)?);

    Ok(fern::Dispatch::new()
        .level(LevelFilter::Warn)
        .level_for(CRATE_NAME.replace('-', "_"), level)
        .chain(stdout)
        .chain(file))
}

pub fn init(path: &Path, level: LevelFilter) -> Result<(), fern::InitError> {
    dispatch(path, level)?.apply()?;
    trace!("Logging framework has been initialized.");
    Ok(())
}
