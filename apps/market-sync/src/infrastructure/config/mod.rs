//! Configuration Module
//!
//! Configuration loading for the sync service.

mod settings;

pub use settings::{
    ConfigError, Credentials, FeedSettings, LiveRangeSpec, LiveRangeSpecError, ServerSettings,
    SyncConfig, SyncSettings,
};
