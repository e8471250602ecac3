//! Logging during tests.

use tokio::runtime::RuntimeFlavor;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configures logging for the current test, **single-threaded runtime only**.
///
/// Logs are captured by the test harness and only shown for failing tests. Without
/// `RUST_LOG` everything from the dat-archive crates is logged at DEBUG level, other crates
/// are silenced.
///
/// # Example
///
/// ```
/// #[tokio::test]
/// async fn test_something() {
///     let _guard = dat_archive_test::logging::setup();
///     assert!(true);
/// }
/// ```
#[must_use = "The tracing guard must only be dropped at the end of the test"]
pub fn setup() -> tracing::subscriber::DefaultGuard {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => (),
            RuntimeFlavor::MultiThread => {
                panic!("logging::setup() does not work in a multi-threaded tokio runtime");
            }
            _ => panic!("unknown runtime flavour"),
        }
    }
    testing_subscriber().set_default()
}

/// Returns the [`tracing::Subscriber`] used by [`setup`].
///
/// Use this directly together with `tracing::instrument::WithSubscriber` for tests on a
/// multi-threaded runtime.
pub fn testing_subscriber() -> impl tracing::Subscriber {
    let filter = match std::env::var_os("RUST_LOG") {
        Some(_) => EnvFilter::from_default_env(),
        None => EnvFilter::default()
            .add_directive(LevelFilter::WARN.into())
            .add_directive("dat_archive=debug".parse().expect("static directive")),
    };
    tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .event_format(tracing_subscriber::fmt::format().with_line_number(true))
            .with_writer(|| TestWriter)
            .with_filter(filter),
    )
}

/// A tracing writer that interacts well with test output capture.
#[derive(Debug)]
struct TestWriter;

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        print!("{}", String::from_utf8_lossy(buf));
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::Write::flush(&mut std::io::stdout())
    }
}
