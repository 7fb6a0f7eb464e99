// Logger setup
//
// All crates log through the `log` facade. This installs env_logger
// as the backend so that `RUST_LOG` picks what gets printed.
//
// Austin Shafer - 2020
use std::sync::Once;

static INIT: Once = Once::new();

/// The level used when `RUST_LOG` is not set
pub const DEFAULT_LEVEL: ::log::LevelFilter = ::log::LevelFilter::Warn;

/// Install the global logger
///
/// Safe to call any number of times, only the first call does anything.
/// If some other logger was installed first we leave it alone.
pub fn init() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();

        match std::env::var("RUST_LOG") {
            Ok(filter) => {
                builder.parse_filters(&filter);
            }
            Err(_) => {
                builder.filter_level(DEFAULT_LEVEL);
            }
        }

        builder.format_timestamp_millis();
        if builder.try_init().is_ok() {
            ::log::debug!("logging initialized");
        }
    });
}

/// Same as `init` but sends output through the test harness capture
pub fn init_for_tests() {
    let _ = env_logger::Builder::new()
        .filter_level(::log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
