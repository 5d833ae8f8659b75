//! Process-wide logging setup
//!
//! stdout carries MCP messages, so every log line goes to stderr.
//! [`init`] installs the subscriber once per process; later calls do
//! nothing. `RUST_LOG` overrides the level chosen on the command line.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogLevel;

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the stderr subscriber. Returns `true` on the call that did it.
pub fn init(level: LogLevel) -> bool {
    let mut installed = false;
    INITIALIZED.get_or_init(|| {
        install(level);
        installed = true;
    });
    installed
}

/// Filter directives for `level` when `RUST_LOG` is unset.
///
/// Dependencies stay at `warn` unless only errors are wanted.
pub fn default_directives(level: LogLevel) -> String {
    let others = match level {
        LogLevel::Error => "error",
        LogLevel::Info | LogLevel::Debug => "warn",
    };
    format!("{others},authful_mcp_proxy={}", level.as_filter())
}

fn install(level: LogLevel) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
    if let Err(e) = result {
        eprintln!("logging already configured: {e}");
    }
}
