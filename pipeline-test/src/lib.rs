//! Miscellaneous test code for the pipeline crates.
#![warn(missing_docs)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

use std::{collections::HashSet, sync::Once};

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod net;
pub mod prelude;

static INIT: Once = Once::new();

/// Backtrace frames from the runtime and test harness, which are hidden from error reports.
const HIDDEN_FRAMES: &[&str] = &[
    "tokio::",
    "std::panic",
    "std::thread::local",
    "core::ops::function::FnOnce::call_once",
    "<core::pin::Pin<P> as core::future::future::Future>::poll",
    "<tracing_futures::Instrumented",
    "<tower_batch_endpoint::future::ResponseFuture",
    "test::",
];

/// Initialize the tracing subscriber and error report hooks for tests.
///
/// Safe to call from every test: only the first call has any effect.
pub fn init() {
    INIT.call_once(|| {
        // Use the RUST_LOG env var, or by default warn, but hide the expected
        // warnings for dropped and timed out batch deliveries.
        let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn")
                .add_directive("tower_batch_endpoint::executor=error".parse().unwrap())
                .add_directive("pipeline_test::net=error".parse().unwrap())
        });

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().with_target(false))
            .with(ErrorLayer::default())
            .init();

        color_eyre::config::HookBuilder::default()
            .add_frame_filter(Box::new(|frames| {
                let mut displayed = HashSet::new();

                frames.retain(|frame| {
                    if !displayed.insert((frame.lineno, frame.filename.clone())) {
                        return false;
                    }

                    frame.name.as_ref().map_or(true, |name| {
                        !HIDDEN_FRAMES.iter().any(|hidden| name.starts_with(hidden))
                    })
                });
            }))
            .install()
            .unwrap();
    })
}
