use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Registry part name, the identity key across the whole pipeline and
/// the remote knowledge base (e.g. `BBa_X0001`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartName(String);

impl PartName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File stem safe for staging blob names. Anything outside
    /// `[A-Za-z0-9._-]` is replaced so a part name can never escape the
    /// staging directory.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                    ch
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for PartName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartName {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidPartName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Best homology hit for a part, plus the secondary UniProt lookups
/// keyed by its accession. Attached to a record only when the aligner
/// produced a hit for the part name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomologyAnnotation {
    /// The aligner is run with a single target sequence, so this is
    /// always 1; kept explicit because the remote vocabulary models it.
    pub hit_number: u32,
    pub accession: String,
    pub bit_score: Option<String>,
    pub e_value: Option<String>,
    pub protein_name: Option<String>,
    pub organism: Option<String>,
    pub ec_number: Option<String>,
    #[serde(default)]
    pub cross_references: BTreeMap<String, String>,
}

/// Canonical field names used by the reconciler dispatch table. The
/// typed fields of [`PartRecord`] surface under these names; keys from
/// `extra` surface under their raw export names and are skipped with a
/// diagnostic.
pub mod field {
    pub const PART_NAME: &str = "part name";
    pub const DESCRIPTION: &str = "description";
    pub const LONG_DESCRIPTION: &str = "long description";
    pub const AUTHORS: &str = "authors";
    pub const PART_TYPE: &str = "part type";
    pub const STATUS: &str = "status";
    pub const NICKNAME: &str = "nickname";
    pub const PART_ID: &str = "part id";
    pub const SEQUENCE_LENGTH: &str = "sequence length";
    pub const RESTRICTION_SITES: &str = "restriction sites";
    pub const COMPATIBLE: &str = "compatible";
    pub const INCOMPATIBLE: &str = "incompatible";
    pub const HOMOLOGY: &str = "homology";
}

/// One normalized part record, built incrementally across pipeline
/// stages. Unknown export fields survive verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_name: PartName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_u_list: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub restriction_sites: BTreeMap<String, Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incompatible: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homology: Option<HomologyAnnotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl PartRecord {
    pub fn new(part_name: PartName) -> Self {
        Self {
            part_name,
            part_id: None,
            description: None,
            long_description: None,
            authors: Vec::new(),
            part_type: None,
            status: None,
            nickname: None,
            sequence_length: None,
            deep_u_list: None,
            restriction_sites: BTreeMap::new(),
            compatible: None,
            incompatible: None,
            homology: None,
            extra: BTreeMap::new(),
        }
    }

    /// Populated semantic field names in dispatch order, followed by
    /// the raw `extra` keys.
    pub fn field_names(&self) -> Vec<String> {
        let mut names = vec![field::PART_NAME.to_string()];
        if self.description.is_some() {
            names.push(field::DESCRIPTION.to_string());
        }
        if self.long_description.is_some() {
            names.push(field::LONG_DESCRIPTION.to_string());
        }
        if !self.authors.is_empty() {
            names.push(field::AUTHORS.to_string());
        }
        if self.part_type.is_some() {
            names.push(field::PART_TYPE.to_string());
        }
        if self.status.is_some() {
            names.push(field::STATUS.to_string());
        }
        if self.nickname.is_some() {
            names.push(field::NICKNAME.to_string());
        }
        if self.part_id.is_some() {
            names.push(field::PART_ID.to_string());
        }
        if self.sequence_length.is_some() {
            names.push(field::SEQUENCE_LENGTH.to_string());
        }
        if !self.restriction_sites.is_empty() {
            names.push(field::RESTRICTION_SITES.to_string());
        }
        if self.compatible.is_some() {
            names.push(field::COMPATIBLE.to_string());
        }
        if self.incompatible.is_some() {
            names.push(field::INCOMPATIBLE.to_string());
        }
        if self.homology.is_some() {
            names.push(field::HOMOLOGY.to_string());
        }
        if self.deep_u_list.is_some() {
            names.push("deep_u_list".to_string());
        }
        names.extend(self.extra.keys().cloned());
        names
    }

    /// Number of populated fields, the part name included. Records with
    /// fewer than two are considered empty export noise and skipped.
    pub fn populated_field_count(&self) -> usize {
        self.field_names().len()
    }

    /// Drops every field whose serialized value is `max_len` characters
    /// or longer; the remote statement model does not take arbitrarily
    /// long literals. The part name is identity and always kept.
    /// Returns the names of the dropped fields.
    pub fn drop_oversized(&mut self, max_len: usize) -> Vec<String> {
        let mut dropped = Vec::new();

        macro_rules! check_opt {
            ($field:ident, $name:expr) => {
                if let Some(value) = &self.$field {
                    if serialized_len(value) >= max_len {
                        self.$field = None;
                        dropped.push($name.to_string());
                    }
                }
            };
        }

        check_opt!(description, field::DESCRIPTION);
        check_opt!(long_description, field::LONG_DESCRIPTION);
        check_opt!(part_type, field::PART_TYPE);
        check_opt!(status, field::STATUS);
        check_opt!(nickname, field::NICKNAME);
        check_opt!(part_id, field::PART_ID);
        check_opt!(deep_u_list, "deep_u_list");
        check_opt!(compatible, field::COMPATIBLE);
        check_opt!(incompatible, field::INCOMPATIBLE);

        if !self.authors.is_empty() && serialized_len(&self.authors) >= max_len {
            self.authors.clear();
            dropped.push(field::AUTHORS.to_string());
        }
        if !self.restriction_sites.is_empty() && serialized_len(&self.restriction_sites) >= max_len
        {
            self.restriction_sites.clear();
            dropped.push(field::RESTRICTION_SITES.to_string());
        }

        let oversized_extra: Vec<String> = self
            .extra
            .iter()
            .filter(|(_, value)| serialized_len(value) >= max_len)
            .map(|(key, _)| key.clone())
            .collect();
        for key in oversized_extra {
            self.extra.remove(&key);
            dropped.push(key);
        }

        dropped
    }
}

fn serialized_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}
