use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Serialized field values this long or longer are dropped before final
/// staging; the remote statement model does not reliably represent
/// arbitrarily long literals.
pub const DEFAULT_MAX_VALUE_LEN: usize = 250;

/// A `deep_u_list` with this many underscore tokens or fewer only
/// references the part itself and is skipped as a benign no-op. The
/// threshold is inherited from the upstream pipeline; it has no
/// documented derivation, so it stays configurable.
pub const DEFAULT_SELF_CONTAIN_MAX_TOKENS: usize = 3;

pub const DEFAULT_UNIPROT_SPARQL_ENDPOINT: &str = "https://sparql.uniprot.org/sparql/";
pub const DEFAULT_PART_PAGE_BASE: &str = "http://parts.igem.org/Part:";
pub const DEFAULT_SEQUENCE_URL_BASE: &str =
    "http://parts.igem.org/cgi/partsdb/composite_edit/putseq.cgi?part=";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub registry_export: String,
    pub sparql_endpoint: String,
    pub api_url: String,
    #[serde(default)]
    pub aligner_database: Option<String>,
    #[serde(default)]
    pub fasta_batch: Option<String>,
    #[serde(default)]
    pub alignment_report: Option<String>,
    #[serde(default)]
    pub staging_root: Option<String>,
    #[serde(default)]
    pub lookup_cache: Option<String>,
    #[serde(default)]
    pub uniprot_sparql_endpoint: Option<String>,
    #[serde(default)]
    pub max_value_len: Option<usize>,
    #[serde(default)]
    pub self_contain_max_tokens: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub registry_export: Utf8PathBuf,
    pub sparql_endpoint: String,
    pub api_url: String,
    pub aligner_database: Option<Utf8PathBuf>,
    pub fasta_batch: Utf8PathBuf,
    pub alignment_report: Utf8PathBuf,
    pub temp_dir: Utf8PathBuf,
    pub final_dir: Utf8PathBuf,
    pub linked_dir: Utf8PathBuf,
    pub lookup_cache: Utf8PathBuf,
    pub uniprot_sparql_endpoint: String,
    pub max_value_len: usize,
    pub self_contain_max_tokens: usize,
    pub part_page_base: String,
    pub sequence_url_base: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("bioparts-sync.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SyncError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let staging_root = Utf8PathBuf::from(
            config
                .staging_root
                .unwrap_or_else(|| ".bioparts-sync".to_string()),
        );

        let lookup_cache = match config.lookup_cache {
            Some(path) => Utf8PathBuf::from(path),
            None => default_lookup_cache_path()?,
        };

        Ok(ResolvedConfig {
            registry_export: Utf8PathBuf::from(config.registry_export),
            sparql_endpoint: config.sparql_endpoint,
            api_url: config.api_url,
            aligner_database: config.aligner_database.map(Utf8PathBuf::from),
            fasta_batch: config
                .fasta_batch
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| staging_root.join("parts.fna")),
            alignment_report: config
                .alignment_report
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| staging_root.join("alignment_report.xml")),
            temp_dir: staging_root.join("temp"),
            final_dir: staging_root.join("final"),
            linked_dir: staging_root.join("linked"),
            lookup_cache,
            uniprot_sparql_endpoint: config
                .uniprot_sparql_endpoint
                .unwrap_or_else(|| DEFAULT_UNIPROT_SPARQL_ENDPOINT.to_string()),
            max_value_len: config.max_value_len.unwrap_or(DEFAULT_MAX_VALUE_LEN),
            self_contain_max_tokens: config
                .self_contain_max_tokens
                .unwrap_or(DEFAULT_SELF_CONTAIN_MAX_TOKENS),
            part_page_base: DEFAULT_PART_PAGE_BASE.to_string(),
            sequence_url_base: DEFAULT_SEQUENCE_URL_BASE.to_string(),
        })
    }
}

fn default_lookup_cache_path() -> Result<Utf8PathBuf, SyncError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(
                dirs.home_dir()
                    .join(".cache")
                    .join("bioparts-sync")
                    .join("item_lookup.json"),
            )
            .ok()
        })
        .ok_or_else(|| SyncError::Filesystem("unable to resolve cache directory".to_string()))
}
