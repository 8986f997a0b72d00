use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use tracing::info;

use crate::annotate::{self, RESTRICTION_PANEL};
use crate::domain::{PartName, PartRecord};
use crate::error::SyncError;

/// Registry-internal bookkeeping fields that never become statements.
pub const UNWANTED_KEYS: &[&str] = &[
    "seq_edit_cache",
    "p_status_cache",
    "s_status_cache",
    "sequence_update",
    "review_result",
    "review_count",
    "review_total",
    "flag",
    "rating",
    "notes",
    "ok",
    "has_barcode",
    "temp_1",
    "temp_2",
    "temp_3",
    "temp4",
    "ps_string",
    "favorite",
    "works",
    "doc_size",
    "uses",
    "m_user_id",
    "m_datetime",
    "sample_status",
    "discontinued",
    "informational",
    "dominant",
    "sequence_sha1",
    "categories",
    "group_u_list",
    "deep_count",
    "scars",
    "default_scars",
    "owner_id",
    "owning_group_id",
];

/// Allow-list of recognized part type values. Anything else is dropped
/// from the record with a diagnostic.
pub const PART_TYPES: &[&str] = &[
    "Coding",
    "Intermediate",
    "Regulatory",
    "Generator",
    "Plasmid",
    "Composite",
    "RNA",
    "RBS",
    "Plasmid_Backbone",
    "Reporter",
    "DNA",
    "Terminator",
    "Inverter",
    "Project",
    "Measurement",
    "Device",
    "Signalling",
    "Translational_Unit",
    "Primer",
    "Temporary",
    "Protein_Domain",
    "Other",
];

/// One raw export row: field name to raw text, before any normalization.
pub type RawRecord = BTreeMap<String, String>;

/// Reads a registry export file, tolerating invalid bytes (the dumps
/// regularly carry broken encodings).
pub fn read_export(path: &Utf8Path) -> Result<Vec<RawRecord>, SyncError> {
    let bytes = fs::read(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("read export {path}: {err}")))?;
    let text = String::from_utf8_lossy(&bytes);
    parse_export(&text)
}

/// Parses `<row><field name="...">text</field>...</row>` elements.
/// Rows missing the `name` attribute on a field keep parsing; the field
/// is dropped.
pub fn parse_export(text: &str) -> Result<Vec<RawRecord>, SyncError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;
    let mut field_name: Option<String> = None;
    let mut field_value = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => match element.name().as_ref() {
                b"row" => current = Some(RawRecord::new()),
                b"field" => {
                    field_name = element
                        .try_get_attribute("name")
                        .map_err(|err| SyncError::ExportParse(err.to_string()))?
                        .and_then(|attr| attr.unescape_value().ok())
                        .map(|value| value.into_owned());
                    field_value.clear();
                }
                _ => {}
            },
            Ok(Event::Text(text)) => {
                if field_name.is_some() {
                    let chunk = text
                        .unescape()
                        .map(|value| value.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(text.as_ref()).into_owned());
                    field_value.push_str(&chunk);
                }
            }
            Ok(Event::CData(data)) => {
                if field_name.is_some() {
                    field_value.push_str(&String::from_utf8_lossy(data.as_ref()));
                }
            }
            Ok(Event::End(element)) => match element.name().as_ref() {
                b"field" => {
                    if let (Some(record), Some(name)) = (current.as_mut(), field_name.take()) {
                        record.insert(name, field_value.trim().to_string());
                    }
                    field_value.clear();
                }
                b"row" => {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(SyncError::ExportParse(err.to_string())),
        }
    }

    Ok(records)
}

/// Turns raw export rows into canonical [`PartRecord`]s and fans
/// sequences out into the shared FASTA batch file.
pub struct Normalizer {
    html_tag: Regex,
    author_split: Regex,
    fasta_batch: Utf8PathBuf,
}

impl Normalizer {
    pub fn new(fasta_batch: Utf8PathBuf) -> Self {
        Self {
            html_tag: Regex::new(r"<.*?>").expect("static regex"),
            author_split: Regex::new(r",\s+|\s+and\s+").expect("static regex"),
            fasta_batch,
        }
    }

    /// Returns `None` when the row has no part name or normalizes down
    /// to fewer than two populated fields. Side effect: a sequence of
    /// at least two characters appends one FASTA entry to the batch
    /// file for the later aligner run.
    pub fn normalize(&self, raw: &RawRecord) -> Result<Option<PartRecord>, SyncError> {
        let Some(part_name) = raw
            .get("part_name")
            .and_then(|value| value.parse::<PartName>().ok())
        else {
            info!(
                part_id = raw.get("part_id").map(String::as_str).unwrap_or("?"),
                "skipping row without part_name"
            );
            return Ok(None);
        };

        let mut record = PartRecord::new(part_name);

        for (key, value) in raw {
            if value.is_empty() || UNWANTED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match key.as_str() {
                "part_name" => {}
                "sequence" => {
                    if value.len() >= 2 {
                        append_fasta(&self.fasta_batch, record.part_name.as_str(), value)?;
                        record.restriction_sites =
                            annotate::find_restriction_sites(value, RESTRICTION_PANEL);
                        let (compatible, incompatible) = annotate::classify_assembly(value);
                        record.compatible = compatible;
                        record.incompatible = incompatible;
                    }
                }
                // The export calls the long free-text field "description"
                // and the short one "short_desc".
                "description" => record.long_description = Some(self.strip_html(value)),
                "short_desc" => record.description = Some(self.strip_html(value)),
                "author" => record.authors = self.split_authors(value),
                "part_type" => {
                    if PART_TYPES.contains(&value.as_str()) {
                        record.part_type = Some(value.clone());
                    } else {
                        info!(part = %record.part_name, part_type = %value, "unrecognized part type, dropping field");
                    }
                }
                "status" => record.status = Some(value.clone()),
                "nickname" => record.nickname = Some(value.clone()),
                "part_id" => record.part_id = Some(value.clone()),
                "sequence_length" => match value.parse::<u64>() {
                    Ok(length) => record.sequence_length = Some(length),
                    Err(_) => {
                        info!(part = %record.part_name, value = %value, "unparseable sequence_length, dropping field");
                    }
                },
                "deep_u_list" => record.deep_u_list = Some(value.clone()),
                _ => {
                    record.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if record.populated_field_count() < 2 {
            info!(part = %record.part_name, "record empty after normalization, skipping");
            return Ok(None);
        }

        Ok(Some(record))
    }

    fn strip_html(&self, value: &str) -> String {
        self.html_tag.replace_all(value, "").trim().to_string()
    }

    fn split_authors(&self, value: &str) -> Vec<String> {
        self.author_split
            .split(value)
            .map(|author| author.trim().to_string())
            .filter(|author| !author.is_empty())
            .collect()
    }
}

/// Appends one two-line FASTA entry. Safe to call once per record
/// against the same batch file; the file is append-only and consumed
/// wholesale by the aligner step.
pub fn append_fasta(path: &Utf8Path, name: &str, sequence: &str) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("open fasta batch {path}: {err}")))?;
    writeln!(file, ">{name}\n{sequence}").map_err(|err| SyncError::Filesystem(err.to_string()))
}
