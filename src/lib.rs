pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::config::{ConfigOverrides, ConverterConfig};
pub use crate::error::{ConverterError, ErrorKind, ItemError};
pub use crate::models::{
    BatchStats, ConversionOutcome, ConversionReport, ConversionResult, ConversionTask, SkipReason,
};
pub use crate::services::pipeline::Pipeline;
pub use crate::services::storage::{ObjectStore, StoreError};
pub use crate::services::transcoder::{
    ImageInfo, ImageKind, ImageTranscoder, TranscodeError, Transcoded,
};
