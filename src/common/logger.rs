//! logger module
//! all output goes through pretty_env_logger, with a tag prefix per module

use std::io::Error;
use pretty_env_logger;
use super::setting::Settings;

/// init logger, level comes from settings
pub fn init_logger() -> Result<(), Error> {
    // already initialised
    if log::max_level() != log::LevelFilter::Off {
        return Ok(())
    }

    let level = match Settings::try_get() {
        Some(settings) => level_from_str(settings.env.log_level.as_str()),
        None => log::LevelFilter::Info,
    };

    // try_init: tests may race to initialise from several threads
    let _ = pretty_env_logger::formatted_builder()
        .target(pretty_env_logger::env_logger::Target::Stdout)
        .filter_level(level)
        // per tag overrides, e.g. RUST_LOG=process_runner=trace
        .parse_env("RUST_LOG")
        .try_init();
    Ok(())
}

fn level_from_str(level: &str) -> log::LevelFilter {
    match level {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info
    }
}


/// log under the module TAG: the tag is the log target (so RUST_LOG=identification=trace works)
/// and is repeated as a [TAG] prefix in the message
#[doc(hidden)]
#[macro_export]
macro_rules! tagged_log {
    ($level:expr, $tag:expr, $($arg:tt)*) => ({
        log::log!(target: $tag, $level, "[{}] {}", $tag, format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! error {
    ($tag:expr, $($arg:tt)*) => ($crate::tagged_log!(log::Level::Error, $tag, $($arg)*))
}

#[macro_export]
macro_rules! warn {
    ($tag:expr, $($arg:tt)*) => ($crate::tagged_log!(log::Level::Warn, $tag, $($arg)*))
}

#[macro_export]
macro_rules! info {
    ($tag:expr, $($arg:tt)*) => ($crate::tagged_log!(log::Level::Info, $tag, $($arg)*))
}

#[macro_export]
macro_rules! debug {
    ($tag:expr, $($arg:tt)*) => ($crate::tagged_log!(log::Level::Debug, $tag, $($arg)*))
}

#[macro_export]
macro_rules! trace {
    ($tag:expr, $($arg:tt)*) => ($crate::tagged_log!(log::Level::Trace, $tag, $($arg)*))
}
