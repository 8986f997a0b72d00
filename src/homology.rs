use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use camino::Utf8Path;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::info;

use crate::domain::{HomologyAnnotation, PartRecord};
use crate::error::SyncError;
use crate::wikibase::send_with_retries;

/// Best hit for one query, as reported by the aligner. Scores stay
/// verbatim strings; they are republished as qualifier literals, never
/// computed with.
#[derive(Debug, Clone, PartialEq)]
pub struct HomologyHit {
    pub accession: String,
    pub description: String,
    pub bit_score: Option<String>,
    pub e_value: Option<String>,
}

pub trait Aligner: Send + Sync {
    fn align(&self, fasta: &Utf8Path, report: &Utf8Path) -> Result<(), SyncError>;
}

impl<A: Aligner + ?Sized> Aligner for Box<A> {
    fn align(&self, fasta: &Utf8Path, report: &Utf8Path) -> Result<(), SyncError> {
        (**self).align(fasta, report)
    }
}

/// Shells out to the DIAMOND protein aligner, one batch run over the
/// whole FASTA file. The batch file is deleted after a successful run
/// so a rerun starts from a clean accumulation.
pub struct DiamondAligner {
    binary: PathBuf,
    database: PathBuf,
}

impl DiamondAligner {
    pub fn new(database: &Utf8Path) -> Result<Self, SyncError> {
        let binary = find_in_path("diamond")
            .ok_or_else(|| SyncError::MissingTool("diamond".to_string()))?;
        Ok(Self {
            binary,
            database: database.as_std_path().to_path_buf(),
        })
    }
}

impl Aligner for DiamondAligner {
    fn align(&self, fasta: &Utf8Path, report: &Utf8Path) -> Result<(), SyncError> {
        let args = vec![
            "blastx".to_string(),
            "-d".to_string(),
            self.database.to_string_lossy().to_string(),
            "-q".to_string(),
            fasta.to_string(),
            "-o".to_string(),
            report.to_string(),
            "--outfmt".to_string(),
            "5".to_string(),
            "--max-target-seqs".to_string(),
            "1".to_string(),
        ];
        run_cmd(&self.binary, &args)?;
        fs::remove_file(fasta.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("remove fasta batch {fasta}: {err}")))?;
        Ok(())
    }
}

fn run_cmd(program: &Path, args: &[String]) -> Result<(), SyncError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| SyncError::AlignerFailed(err.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let message = if stderr.is_empty() {
        format!("command failed: {}", program.display())
    } else {
        stderr
    };
    Err(SyncError::AlignerFailed(message))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

/// Reads a BLAST-XML report, tolerating invalid bytes.
pub fn read_report(path: &Utf8Path) -> Result<BTreeMap<String, HomologyHit>, SyncError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("read report {path}: {err}")))?;
    let text = String::from_utf8_lossy(&bytes);
    parse_report(&text)
}

/// Parses BLAST-XML iterations into one best hit per query name. The
/// aligner is invoked with a single target sequence per query, so only
/// the first hit of each iteration is kept.
pub fn parse_report(text: &str) -> Result<BTreeMap<String, HomologyHit>, SyncError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut hits = BTreeMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut query: Option<String> = None;
    let mut accession = String::new();
    let mut description = String::new();
    let mut bit_score: Option<String> = None;
    let mut e_value: Option<String> = None;
    let mut hit_seen = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if name == "Iteration" {
                    query = None;
                    accession.clear();
                    description.clear();
                    bit_score = None;
                    e_value = None;
                    hit_seen = false;
                }
                path.push(name);
            }
            Ok(Event::Text(text)) => {
                let Some(tag) = path.last() else { continue };
                let value = text
                    .unescape()
                    .map(|value| value.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(text.as_ref()).into_owned());
                match tag.as_str() {
                    "Iteration_query-def" => query = Some(value.trim().to_string()),
                    "Hit_accession" if !hit_seen => accession = value.trim().to_string(),
                    "Hit_def" if !hit_seen => description = value.trim().to_string(),
                    "Hsp_bit-score" if !hit_seen && bit_score.is_none() => {
                        bit_score = Some(value.trim().to_string());
                    }
                    "Hsp_evalue" if !hit_seen && e_value.is_none() => {
                        e_value = Some(value.trim().to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if name == "Hit" {
                    hit_seen = true;
                }
                if name == "Iteration" {
                    if let Some(query_name) = query.take() {
                        if !accession.is_empty() {
                            hits.insert(
                                query_name,
                                HomologyHit {
                                    accession: accession.clone(),
                                    description: description.clone(),
                                    bit_score: bit_score.clone(),
                                    e_value: e_value.clone(),
                                },
                            );
                        }
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(SyncError::ReportParse(err.to_string())),
        }
    }

    Ok(hits)
}

static ORGANISM_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"OS=(.*?)\s+OX=").expect("static regex"));
static PROTEIN_NAME_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*OS=").expect("static regex"));

/// Organism name from a UniProt-style hit description: the text between
/// the `OS=` and ` OX=` markers. A line without both markers yields
/// `None`, not an error.
pub fn organism_of(description: &str) -> Option<String> {
    ORGANISM_MARKER
        .captures(description)
        .map(|caps| caps[1].trim().to_string())
}

/// Protein name from a hit description: everything before the `OS=`
/// marker.
pub fn protein_name_of(description: &str) -> Option<String> {
    PROTEIN_NAME_MARKER
        .captures(description)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

pub trait UniprotClient: Send + Sync {
    /// Cross-reference database identifiers for an accession
    /// (rdfs:seeAlso), as database name to identifier.
    fn cross_references(&self, accession: &str) -> Result<BTreeMap<String, String>, SyncError>;

    /// EC number for an accession, `Ok(None)` when the protein has no
    /// enzyme annotation.
    fn ec_number(&self, accession: &str) -> Result<Option<String>, SyncError>;
}

const UNIPROT_ENTITY_BASE: &str = "http://purl.uniprot.org/uniprot/";

#[derive(Clone)]
pub struct UniprotSparqlClient {
    client: Client,
    endpoint: String,
}

impl UniprotSparqlClient {
    pub fn new(endpoint: &str) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bioparts-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SyncError::UniprotHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn query(&self, query: &str) -> Result<Value, SyncError> {
        let response = send_with_retries(
            || {
                self.client
                    .get(&self.endpoint)
                    .query(&[("query", query), ("format", "json")])
                    .send()
            },
            SyncError::UniprotHttp,
        )?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "uniprot request failed".to_string());
            return Err(SyncError::UniprotStatus { status, message });
        }
        response
            .json()
            .map_err(|err| SyncError::UniprotHttp(err.to_string()))
    }
}

impl UniprotClient for UniprotSparqlClient {
    fn cross_references(&self, accession: &str) -> Result<BTreeMap<String, String>, SyncError> {
        let query = format!(
            "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
             SELECT ?id WHERE {{ <{UNIPROT_ENTITY_BASE}{accession}> rdfs:seeAlso ?id }}"
        );
        let results = self.query(&query)?;
        let mut refs = BTreeMap::new();
        for binding in bindings(&results) {
            let Some(url) = binding
                .get("id")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            // Values look like http://purl.uniprot.org/<database>/<id>.
            let mut segments = url
                .strip_prefix("http://purl.uniprot.org/")
                .unwrap_or(url)
                .split('/');
            if let (Some(database), Some(id)) = (segments.next(), segments.next()) {
                refs.insert(database.to_string(), id.to_string());
            }
        }
        Ok(refs)
    }

    fn ec_number(&self, accession: &str) -> Result<Option<String>, SyncError> {
        let query = format!(
            "PREFIX core: <http://purl.uniprot.org/core/>\n\
             SELECT ?enzyme WHERE {{ <{UNIPROT_ENTITY_BASE}{accession}> core:enzyme ?enzyme . }}"
        );
        let results = self.query(&query)?;
        for binding in bindings(&results) {
            if let Some(url) = binding
                .get("enzyme")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            {
                let ec = url.rsplit('/').next().unwrap_or(url);
                return Ok(Some(ec.to_string()));
            }
        }
        Ok(None)
    }
}

pub(crate) fn bindings(results: &Value) -> impl Iterator<Item = &Value> {
    results
        .get("results")
        .and_then(|v| v.get("bindings"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter())
        .into_iter()
        .flatten()
}

/// Merges the best hit for `record.part_name` (if any) plus the
/// secondary UniProt lookups into the record. A missing hit is a valid
/// absence: the record comes back untouched.
pub fn enrich<U: UniprotClient>(
    record: &mut PartRecord,
    hits: &BTreeMap<String, HomologyHit>,
    uniprot: &U,
) -> Result<(), SyncError> {
    let Some(hit) = hits.get(record.part_name.as_str()) else {
        info!(part = %record.part_name, "no homology hit");
        return Ok(());
    };

    info!(part = %record.part_name, accession = %hit.accession, "merging homology hit");
    let cross_references = uniprot.cross_references(&hit.accession)?;
    let ec_number = uniprot.ec_number(&hit.accession)?;

    record.homology = Some(HomologyAnnotation {
        hit_number: 1,
        accession: hit.accession.clone(),
        bit_score: hit.bit_score.clone(),
        e_value: hit.e_value.clone(),
        protein_name: protein_name_of(&hit.description),
        organism: organism_of(&hit.description),
        ec_number,
        cross_references,
    });
    Ok(())
}
