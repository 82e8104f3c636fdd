//! Global subscriber installation

use serial_test::serial;
use tracing::Level;

use powerdial_core::logging::{parse_log_level, setup_logging, LoggingConfig};

#[test]
#[serial]
fn test_subscriber_installs_once() {
    let level = parse_log_level("debug").unwrap();
    assert_eq!(level, Level::DEBUG);

    let config = LoggingConfig::new(level, "powerdial-test").with_file_info();
    assert!(setup_logging(config.clone()).is_ok());

    // A second global subscriber is refused rather than replacing the first
    let err = setup_logging(config).unwrap_err();
    assert_eq!(err.category(), "config");
}
