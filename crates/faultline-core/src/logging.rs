use std::io::stderr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, registry, Layer};

/// Install the global fmt subscriber at `level`, writing to stderr.
///
/// Returns false if a subscriber was already installed; the existing one is
/// left in place.
pub fn init(level: LevelFilter) -> bool {
    registry()
        .with(
            fmt::layer()
                .with_writer(stderr)
                .with_target(false)
                .with_filter(level),
        )
        .try_init()
        .is_ok()
}
