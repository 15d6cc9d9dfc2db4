//! Asynchronous translation jobs for Chinese text.
//!
//! A submitted text becomes a persisted job. Leased workers drive a
//! [`provider::Translator`] over it, committing segments one by one, while
//! any number of subscribers follow the job's progress stream.

pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod provider;
pub mod sanitize;
pub mod service;
pub mod stream;
pub mod worker;

pub use broadcast::{ProgressBus, ProgressEvent};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{ConfigError, JobError, Result, WorkerError, YueduError};
pub use jobs::{Job, JobId, JobState, JobStore, LeaseManager, SourceKind};
pub use provider::{DictionaryTranslator, Translator};
pub use service::TranslationService;
pub use stream::{ProgressStream, StreamHandler};
pub use worker::{JobRunner, WorkerPool};
