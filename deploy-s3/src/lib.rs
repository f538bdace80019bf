#[macro_use]
extern crate log;

mod context;
mod log_stream;
mod pattern;
mod plugin;
mod store;
mod upload;

pub mod config;

pub use context::DeploymentContext;
pub use log_stream::message_channel;
pub use log_stream::LogColor;
pub use log_stream::LogFacadeSink;
pub use log_stream::LogOptions;
pub use log_stream::LogSink;
pub use log_stream::MessageStream;
pub use log_stream::MutexVecDequeRead as LogStream;
pub use log_stream::PluginLogs;
pub use pattern::FilePattern;
pub use plugin::{DeployPlugin, S3DeployPlugin, UploadError, UploadSummary};
pub use store::{ObjectStore, PutObjectRequest, RustS3Store};
pub use upload::s3::S3Uploader;
pub use upload::{UploadClient, UploadOptions};
