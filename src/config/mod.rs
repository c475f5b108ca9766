/// TOML application configuration
pub mod settings;

pub use settings::{
    AlertSettings, Config, NotificationSettings, SchedulerSettings, SourceSettings,
    StorageSettings,
};
