//! Logging setup for binaries and tests embedding the crate

use env_logger::Builder;
use log::LevelFilter;
pub use log::{debug, info, warn};

/// Log at `info` level unless `RUST_LOG` says otherwise, can be called more than once
pub fn init() {
    let mut builder = Builder::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        builder.filter(None, LevelFilter::Info);
    }
    let _ = builder.is_test(cfg!(test)).try_init();
}
