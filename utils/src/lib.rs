pub mod alert;
pub mod configuration_utils;

pub use alert::{Alerter, NoopAlerter, RecordingAlerter};
pub use configuration_utils::ParsableConfigValue;
