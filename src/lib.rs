pub mod app;
pub mod cli;
pub mod config;
pub mod countries;
pub mod form;
pub mod highlight;
pub mod picture;
pub mod record;
pub mod search;
pub mod session;
pub mod storage;
pub mod ui;
pub mod validation;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use record::{Field, Record, RecordDraft};
pub use storage::{KeyValueStore, RecordStore};
