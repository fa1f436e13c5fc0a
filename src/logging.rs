//! Process-wide structured logging, initialized lazily and once.
//!
//! Library code calls [`init_once`] before emitting its first event rather
//! than requiring every binary to set up `tracing-subscriber` itself.

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_once() {
    INIT.call_once(|| {
        let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}
