use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MinerError {
    #[error("invalid PMCID: {0}")]
    InvalidPmcid(String),

    #[error("unknown tag domain: {0}")]
    InvalidDomain(String),

    #[error("invalid label cell: {0}")]
    InvalidLabels(String),

    #[error("missing config file at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("column `{column}` not found in {source_name}")]
    MissingColumn { column: String, source_name: String },

    #[error("round file not found: {0}")]
    #[diagnostic(help("run `ftu-miner tag init` first"))]
    MissingRoundFile(PathBuf),

    #[error("round file {path} is malformed: {message}")]
    InvalidRoundFile { path: PathBuf, message: String },

    #[error("round limit reached: round {round} of at most {max_rounds}")]
    #[diagnostic(help("raise `max_rounds` in ftu-miner.json or finalize the agreed rows"))]
    RoundLimitReached { round: u32, max_rounds: u32 },

    #[error("round {0} cannot be compared: no previous round")]
    NoPreviousRound(u32),

    #[error("nothing to merge in {0}")]
    NothingToMerge(PathBuf),

    #[error("{0} already exists (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("chat request failed: {0}")]
    ChatHttp(String),

    #[error("chat endpoint returned status {status}: {message}")]
    ChatStatus { status: u16, message: String },

    #[error("chat response had unexpected shape: {0}")]
    ChatResponse(String),

    #[error("ClickHouse request failed: {0}")]
    ClickHouseHttp(String),

    #[error("ClickHouse returned status {status}: {message}")]
    ClickHouseStatus { status: u16, message: String },

    #[error("BioPortal request failed: {0}")]
    BioportalHttp(String),

    #[error("BioPortal returned status {status}: {message}")]
    BioportalStatus { status: u16, message: String },

    #[error("download failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("XML error in {path}: {message}")]
    Xml { path: String, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
