//! Provide tracing, tailored to this program.
//!
//! At startup the binary calls [`init`] with the configured verbosity to
//! install a tracing subscriber. The rest of the program can include
//! `use crate::tracing::prelude::*` for convenient access to the
//! `trace!()`, `debug!()`, `info!()`, `warn!()`, and `error!()` macros.

use std::fmt;

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer as FmtWriter, time::FormatTime},
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

/// Initialize logging to stdout.
///
/// Verbosity from the command line picks the default level (0 = info,
/// 1 = debug, 2+ = trace); RUST_LOG overrides it.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(LocalTimer)
        .with_target(false)
        .init();
}

// Short HH:MM:SS timestamps in the machine's local time zone. Falls back
// to UTC when the local offset cannot be determined (multi-threaded
// programs on some Unixes).
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut FmtWriter<'_>) -> fmt::Result {
        let t = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        write!(w, "{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
    }
}
