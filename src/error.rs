use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CompareError {
    #[error("missing job config file compare-systems.json in current directory")]
    MissingConfig,

    #[error("failed to read job config at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON job config: {0}")]
    ConfigParse(String),

    #[error("job specifies no genomes and no genome groups")]
    NoGenomes,

    #[error("BV-BRC request failed: {0}")]
    BvbrcHttp(String),

    #[error("BV-BRC returned status {status}: {message}")]
    BvbrcStatus { status: u16, message: String },

    #[error("failed to resolve genome group {group}: {message}")]
    GroupResolution { group: String, message: String },

    #[error("malformed record: {0}")]
    RecordParse(String),

    #[error("no {0} data found for any requested genome")]
    NoData(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
