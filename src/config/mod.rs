mod settings;

pub use settings::{DatabaseSettings, HaSettings, LoggingSettings, Settings};
