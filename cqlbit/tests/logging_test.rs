use cqlbit::testing::RecordingDriver;
use cqlbit::{logger, Session, Settings};

#[test]
fn it_should_follow_the_debug_setting_of_the_latest_session() {
    let driver = RecordingDriver::new().expect("Failed to start recording driver");

    let mut settings = Settings::default();
    settings.logging.debug = true;
    let _verbose = Session::new(driver.clone(), settings);
    assert!(logger::debug_enabled());

    let _quiet = Session::with_defaults(driver);
    assert!(!logger::debug_enabled());
}
