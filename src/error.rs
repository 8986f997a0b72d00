use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid part name: {0}")]
    InvalidPartName(String),

    #[error("missing config file bioparts-sync.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse registry export: {0}")]
    ExportParse(String),

    #[error("failed to parse alignment report: {0}")]
    ReportParse(String),

    #[error("SPARQL request failed: {0}")]
    SparqlHttp(String),

    #[error("SPARQL endpoint returned status {status}: {message}")]
    SparqlStatus { status: u16, message: String },

    #[error("wikibase API request failed: {0}")]
    WikibaseHttp(String),

    #[error("wikibase API returned status {status}: {message}")]
    WikibaseStatus { status: u16, message: String },

    #[error("wikibase login failed: {0}")]
    LoginFailed(String),

    #[error("wikibase write rejected: {0}")]
    WriteRejected(String),

    #[error("uniprot request failed: {0}")]
    UniprotHttp(String),

    #[error("uniprot returned status {status}: {message}")]
    UniprotStatus { status: u16, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("aligner run failed: {0}")]
    AlignerFailed(String),

    #[error("lookup resolution failed for {label}: {message}")]
    ResolveFailed { label: String, message: String },

    #[error("statement rule table invalid: {0}")]
    RuleTable(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
