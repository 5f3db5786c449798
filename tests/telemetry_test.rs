//! Global subscriber installation. Kept in its own test binary because a
//! process can only install one global subscriber.

use rust_flow::config::Settings;
use rust_flow::telemetry::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    let config = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_span_events(true)
        .with_ansi(false);
    assert!(telemetry::init(config.clone()).is_ok());
    assert!(telemetry::init(config).is_ok());

    let mut settings = Settings::default();
    settings.application.log_format = OutputFormat::Json;
    assert!(telemetry::init_from_settings(&settings).is_ok());

    settings.application.log_level = "chatty".to_string();
    assert!(telemetry::init_from_settings(&settings).is_err());
}
