use serde_json::Value;
use tracing::{info, warn};

use crate::domain::{PartRecord, field};
use crate::error::SyncError;
use crate::lookup::{LookupCache, PropertyRegistry};
use crate::statement::{Reference, Snak, SnakValue, Statement, retrieved_qualifier};
use crate::wikibase::{WikibaseClient, WriteOutcome, WriteRequest};

/// Labels of the vocabulary items and properties the reconciler emits
/// against. Items are resolved through the lookup cache; properties
/// through the per-run property registry.
pub mod vocab {
    pub const ITEM_BIOLOGICAL_PART: &str = "biological part";
    pub const ITEM_PARTS_REGISTRY: &str = "Registry of Standard Biological Parts";
    pub const ITEM_TREMBL: &str = "TrEMBL";
    pub const ITEM_DIAMOND: &str = "DIAMOND";
    pub const ITEM_SEQUENCE_TOOLKIT: &str = "sequence analysis toolkit";

    pub const PROP_INSTANCE_OF: &str = "instance of";
    pub const PROP_PART_NAME: &str = "part name";
    pub const PROP_LONG_DESCRIPTION: &str = "long description";
    pub const PROP_AUTHOR: &str = "author";
    pub const PROP_PART_TYPE: &str = "part type";
    pub const PROP_STATUS: &str = "status";
    pub const PROP_PART_ID: &str = "part id";
    pub const PROP_RESTRICTION_SITE: &str = "restriction site";
    pub const PROP_SITE_POSITION: &str = "site position";
    pub const PROP_COMPATIBLE_WITH: &str = "compatible with";
    pub const PROP_INCOMPATIBLE_WITH: &str = "incompatible with";
    pub const PROP_HOMOLOGY_HIT: &str = "homology hit";
    pub const PROP_BIT_SCORE: &str = "bit score";
    pub const PROP_E_VALUE: &str = "e-value";
    pub const PROP_ORGANISM: &str = "organism";
    pub const PROP_PROTEIN_NAME: &str = "protein name";
    pub const PROP_EC_NUMBER: &str = "EC number";
    pub const PROP_SEQUENCE: &str = "sequence";
    pub const PROP_SEQUENCE_LENGTH: &str = "sequence length";
    pub const PROP_RETRIEVED: &str = "retrieved";
    pub const PROP_STATED_IN: &str = "stated in";
    pub const PROP_REFERENCE_URL: &str = "reference URL";
    pub const PROP_DETERMINATION_METHOD: &str = "determination method";
    pub const PROP_CONTAINS: &str = "contains";
}

/// Everything a field handler needs to build statements: remote reads,
/// the property registry, the item cache, and the URL bases for
/// reference and sequence links.
pub struct ReconcileContext<'a> {
    pub client: &'a dyn WikibaseClient,
    pub properties: &'a PropertyRegistry,
    pub items: &'a mut LookupCache,
    pub part_page_base: &'a str,
    pub sequence_url_base: &'a str,
}

#[derive(Default)]
struct ReconcileDraft {
    statements: Vec<Statement>,
    aliases: Vec<String>,
}

type Handler = fn(&PartRecord, &mut ReconcileContext<'_>, &mut ReconcileDraft)
    -> Result<(), SyncError>;

/// Fields the dispatch table must cover, one handler each.
const EXPECTED_FIELDS: &[&str] = &[
    field::PART_NAME,
    field::DESCRIPTION,
    field::LONG_DESCRIPTION,
    field::AUTHORS,
    field::PART_TYPE,
    field::STATUS,
    field::NICKNAME,
    field::PART_ID,
    field::SEQUENCE_LENGTH,
    field::RESTRICTION_SITES,
    field::COMPATIBLE,
    field::INCOMPATIBLE,
    field::HOMOLOGY,
    "deep_u_list",
];

fn rule_table() -> Vec<(&'static str, Handler)> {
    vec![
        (field::PART_NAME, emit_part_name),
        (field::DESCRIPTION, emit_nothing),
        (field::LONG_DESCRIPTION, emit_long_description),
        (field::AUTHORS, emit_authors),
        (field::PART_TYPE, emit_part_type),
        (field::STATUS, emit_status),
        (field::NICKNAME, emit_nickname),
        (field::PART_ID, emit_part_id),
        (field::SEQUENCE_LENGTH, emit_sequence),
        (field::RESTRICTION_SITES, emit_restriction_sites),
        (field::COMPATIBLE, emit_compatible),
        (field::INCOMPATIBLE, emit_incompatible),
        (field::HOMOLOGY, emit_homology),
        // Consumed by the contains-linkage pass, not published directly.
        ("deep_u_list", emit_nothing),
    ]
}

fn validate_rules(rules: &[(&'static str, Handler)]) -> Result<(), SyncError> {
    for (index, (name, _)) in rules.iter().enumerate() {
        if rules[..index].iter().any(|(other, _)| other == name) {
            return Err(SyncError::RuleTable(format!("duplicate rule for {name}")));
        }
    }
    for expected in EXPECTED_FIELDS {
        if !rules.iter().any(|(name, _)| name == expected) {
            return Err(SyncError::RuleTable(format!("no rule for {expected}")));
        }
    }
    Ok(())
}

/// Field-by-field translator from a staged record to one knowledge-base
/// upsert. The dispatch table is fixed at construction and checked for
/// duplicates and coverage, so a drifting field list fails loudly at
/// startup instead of silently dropping data.
pub struct Reconciler {
    rules: Vec<(&'static str, Handler)>,
}

impl Reconciler {
    pub fn new() -> Result<Self, SyncError> {
        let rules = rule_table();
        validate_rules(&rules)?;
        Ok(Self { rules })
    }

    /// Upserts `record` keyed by part-name label: an existing item is
    /// amended (description set when non-empty, aliases replaced), a
    /// missing one is created with the label. Failures propagate so the
    /// caller leaves the record staged for a retry.
    pub fn reconcile(
        &self,
        record: &PartRecord,
        ctx: &mut ReconcileContext<'_>,
    ) -> Result<WriteOutcome, SyncError> {
        let mut draft = ReconcileDraft::default();

        let instance_of = ctx.properties.require(vocab::PROP_INSTANCE_OF)?.to_string();
        let target = ctx
            .items
            .resolve_required(ctx.client, vocab::ITEM_BIOLOGICAL_PART)?;
        let reference = registry_reference(record, ctx)?;
        draft.statements.push(
            Statement::new(Snak::new(instance_of, SnakValue::Item(target)))
                .with_references(vec![reference]),
        );

        for name in record.field_names() {
            match self.rules.iter().find(|(rule, _)| *rule == name) {
                Some((_, handler)) => handler(record, ctx, &mut draft)?,
                None => {
                    info!(part = %record.part_name, %name, "no rule for field, skipping");
                }
            }
        }

        let claims: Vec<Value> = draft
            .statements
            .iter()
            .map(Statement::to_claim_json)
            .collect();
        let description = record
            .description
            .clone()
            .filter(|description| !description.is_empty());

        let request = match ctx.client.query_item_by_label(record.part_name.as_str())? {
            Some(item_id) => WriteRequest {
                item_id: Some(item_id),
                label: None,
                description,
                aliases: draft.aliases,
                claims,
            },
            None => WriteRequest {
                item_id: None,
                label: Some(record.part_name.to_string()),
                description,
                aliases: draft.aliases,
                claims,
            },
        };

        let outcome = ctx.client.write_item(&request)?;
        info!(part = %record.part_name, item = %outcome.item_id, action = ?outcome.action, "reconciled");
        Ok(outcome)
    }
}

fn emit_nothing(
    _record: &PartRecord,
    _ctx: &mut ReconcileContext<'_>,
    _draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    Ok(())
}

/// Provenance bundle for facts taken verbatim from the registry export:
/// stated in the registry, with the part's page as reference URL.
fn registry_reference(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
) -> Result<Reference, SyncError> {
    let stated_in = ctx.properties.require(vocab::PROP_STATED_IN)?.to_string();
    let reference_url = ctx
        .properties
        .require(vocab::PROP_REFERENCE_URL)?
        .to_string();
    let registry = ctx
        .items
        .resolve_required(ctx.client, vocab::ITEM_PARTS_REGISTRY)?;
    Ok(vec![
        Snak::new(stated_in, SnakValue::Item(registry)),
        Snak::new(
            reference_url,
            SnakValue::Url(format!("{}{}", ctx.part_page_base, record.part_name)),
        ),
    ])
}

/// Provenance for homology facts: stated in TrEMBL, determined by the
/// DIAMOND aligner.
fn homology_reference(ctx: &mut ReconcileContext<'_>) -> Result<Reference, SyncError> {
    let stated_in = ctx.properties.require(vocab::PROP_STATED_IN)?.to_string();
    let method = ctx
        .properties
        .require(vocab::PROP_DETERMINATION_METHOD)?
        .to_string();
    let trembl = ctx.items.resolve_required(ctx.client, vocab::ITEM_TREMBL)?;
    let diamond = ctx.items.resolve_required(ctx.client, vocab::ITEM_DIAMOND)?;
    Ok(vec![
        Snak::new(stated_in, SnakValue::Item(trembl)),
        Snak::new(method, SnakValue::Item(diamond)),
    ])
}

/// Provenance for facts this pipeline computed from the sequence.
fn analysis_reference(ctx: &mut ReconcileContext<'_>) -> Result<Reference, SyncError> {
    let method = ctx
        .properties
        .require(vocab::PROP_DETERMINATION_METHOD)?
        .to_string();
    let toolkit = ctx
        .items
        .resolve_required(ctx.client, vocab::ITEM_SEQUENCE_TOOLKIT)?;
    Ok(vec![Snak::new(method, SnakValue::Item(toolkit))])
}

fn retrieved(ctx: &ReconcileContext<'_>) -> Result<Snak, SyncError> {
    let property = ctx.properties.require(vocab::PROP_RETRIEVED)?;
    Ok(retrieved_qualifier(property))
}

fn emit_part_name(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let property = ctx.properties.require(vocab::PROP_PART_NAME)?.to_string();
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(
            property,
            SnakValue::ExternalId(record.part_name.to_string()),
        ))
        .with_references(vec![reference]),
    );
    Ok(())
}

fn emit_long_description(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(text) = &record.long_description else {
        return Ok(());
    };
    let property = ctx
        .properties
        .require(vocab::PROP_LONG_DESCRIPTION)?
        .to_string();
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(property, SnakValue::Str(text.clone())))
            .with_references(vec![reference]),
    );
    Ok(())
}

fn emit_authors(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let property = ctx.properties.require(vocab::PROP_AUTHOR)?.to_string();
    let reference = registry_reference(record, ctx)?;
    for author in &record.authors {
        draft.statements.push(
            Statement::new(Snak::new(property.clone(), SnakValue::Str(author.clone())))
                .with_references(vec![reference.clone()]),
        );
    }
    Ok(())
}

fn emit_part_type(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(part_type) = &record.part_type else {
        return Ok(());
    };
    let property = ctx.properties.require(vocab::PROP_PART_TYPE)?.to_string();
    let Some(item) = ctx.items.resolve(ctx.client, part_type)? else {
        warn!(part = %record.part_name, part_type, "part type has no vocabulary item, skipping");
        return Ok(());
    };
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(property, SnakValue::Item(item)))
            .with_references(vec![reference]),
    );
    Ok(())
}

fn emit_status(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(status) = &record.status else {
        return Ok(());
    };
    let property = ctx.properties.require(vocab::PROP_STATUS)?.to_string();
    let Some(item) = ctx.items.resolve(ctx.client, status)? else {
        warn!(part = %record.part_name, status, "status has no vocabulary item, skipping");
        return Ok(());
    };
    let date = retrieved(ctx)?;
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(property, SnakValue::Item(item)))
            .with_qualifiers(vec![date])
            .with_references(vec![reference]),
    );
    Ok(())
}

fn emit_nickname(
    record: &PartRecord,
    _ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    if let Some(nickname) = &record.nickname {
        draft.aliases.push(nickname.clone());
    }
    Ok(())
}

fn emit_part_id(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(part_id) = &record.part_id else {
        return Ok(());
    };
    let property = ctx.properties.require(vocab::PROP_PART_ID)?.to_string();
    let date = retrieved(ctx)?;
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(property, SnakValue::Str(part_id.clone())))
            .with_qualifiers(vec![date])
            .with_references(vec![reference]),
    );
    draft.aliases.push(part_id.clone());
    Ok(())
}

/// The sequence itself is never published as a literal; the statement
/// links to the registry's sequence page, with the length as qualifier.
fn emit_sequence(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(length) = record.sequence_length else {
        return Ok(());
    };
    let property = ctx.properties.require(vocab::PROP_SEQUENCE)?.to_string();
    let length_property = ctx
        .properties
        .require(vocab::PROP_SEQUENCE_LENGTH)?
        .to_string();
    let date = retrieved(ctx)?;
    let reference = registry_reference(record, ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(
            property,
            SnakValue::Url(format!("{}{}", ctx.sequence_url_base, record.part_name)),
        ))
        .with_qualifiers(vec![
            Snak::new(length_property, SnakValue::Str(length.to_string())),
            date,
        ])
        .with_references(vec![reference]),
    );
    Ok(())
}

fn emit_restriction_sites(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let property = ctx
        .properties
        .require(vocab::PROP_RESTRICTION_SITE)?
        .to_string();
    let position_property = ctx
        .properties
        .require(vocab::PROP_SITE_POSITION)?
        .to_string();
    let registry = registry_reference(record, ctx)?;
    let analysis = analysis_reference(ctx)?;

    for (site, positions) in &record.restriction_sites {
        let Some(item) = ctx.items.resolve(ctx.client, site)? else {
            warn!(part = %record.part_name, site, "restriction site has no vocabulary item, skipping");
            continue;
        };
        let qualifiers = positions
            .iter()
            .map(|position| {
                Snak::new(
                    position_property.clone(),
                    SnakValue::Str(position.to_string()),
                )
            })
            .collect();
        draft.statements.push(
            Statement::new(Snak::new(property.clone(), SnakValue::Item(item)))
                .with_qualifiers(qualifiers)
                .with_references(vec![registry.clone(), analysis.clone()]),
        );
    }
    Ok(())
}

fn emit_compatible(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let standards = record.compatible.clone().unwrap_or_default();
    emit_standards(record, ctx, draft, vocab::PROP_COMPATIBLE_WITH, &standards)
}

fn emit_incompatible(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let standards = record.incompatible.clone().unwrap_or_default();
    emit_standards(record, ctx, draft, vocab::PROP_INCOMPATIBLE_WITH, &standards)
}

fn emit_standards(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
    property_label: &str,
    standards: &[String],
) -> Result<(), SyncError> {
    let property = ctx.properties.require(property_label)?.to_string();
    let analysis = analysis_reference(ctx)?;
    for standard in standards {
        let Some(item) = ctx.items.resolve(ctx.client, standard)? else {
            warn!(part = %record.part_name, standard, "assembly standard has no vocabulary item, skipping");
            continue;
        };
        let date = retrieved(ctx)?;
        draft.statements.push(
            Statement::new(Snak::new(property.clone(), SnakValue::Item(item)))
                .with_qualifiers(vec![date])
                .with_references(vec![analysis.clone()]),
        );
    }
    Ok(())
}

fn emit_homology(
    record: &PartRecord,
    ctx: &mut ReconcileContext<'_>,
    draft: &mut ReconcileDraft,
) -> Result<(), SyncError> {
    let Some(homology) = &record.homology else {
        return Ok(());
    };
    let property = ctx
        .properties
        .require(vocab::PROP_HOMOLOGY_HIT)?
        .to_string();
    let mut qualifiers = Vec::new();

    let optional = [
        (vocab::PROP_PROTEIN_NAME, &homology.protein_name),
        (vocab::PROP_ORGANISM, &homology.organism),
        (vocab::PROP_BIT_SCORE, &homology.bit_score),
        (vocab::PROP_E_VALUE, &homology.e_value),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            let qualifier_property = ctx.properties.require(label)?.to_string();
            qualifiers.push(Snak::new(qualifier_property, SnakValue::Str(value.clone())));
        }
    }
    if let Some(ec) = &homology.ec_number {
        let ec_property = ctx.properties.require(vocab::PROP_EC_NUMBER)?.to_string();
        qualifiers.push(Snak::new(ec_property, SnakValue::ExternalId(ec.clone())));
    }
    // Cross-reference databases map to instance properties by their
    // database name; unknown databases are not an error.
    for (database, id) in &homology.cross_references {
        match ctx.properties.get(database) {
            Some(database_property) => qualifiers.push(Snak::new(
                database_property.to_string(),
                SnakValue::ExternalId(id.clone()),
            )),
            None => {
                info!(part = %record.part_name, database, "no property for cross-reference database");
            }
        }
    }

    let reference = homology_reference(ctx)?;
    draft.statements.push(
        Statement::new(Snak::new(
            property,
            SnakValue::ExternalId(homology.accession.clone()),
        ))
        .with_qualifiers(qualifiers)
        .with_references(vec![reference]),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::wikibase::WriteAction;

    struct FakeWikibase {
        labels: Mutex<BTreeMap<String, String>>,
        writes: Mutex<Vec<WriteRequest>>,
        next_id: Mutex<u32>,
    }

    impl FakeWikibase {
        fn with_vocabulary() -> Self {
            let mut labels = BTreeMap::new();
            for (label, id) in [
                (vocab::ITEM_BIOLOGICAL_PART, "Q1"),
                (vocab::ITEM_PARTS_REGISTRY, "Q2"),
                (vocab::ITEM_TREMBL, "Q3"),
                (vocab::ITEM_DIAMOND, "Q4"),
                (vocab::ITEM_SEQUENCE_TOOLKIT, "Q5"),
                ("EcoRI", "Q10"),
                ("RFC10", "Q20"),
                ("RFC21", "Q21"),
                ("Available", "Q30"),
                ("Coding", "Q31"),
            ] {
                labels.insert(label.to_string(), id.to_string());
            }
            Self {
                labels: Mutex::new(labels),
                writes: Mutex::new(Vec::new()),
                next_id: Mutex::new(100),
            }
        }
    }

    impl WikibaseClient for FakeWikibase {
        fn query_item_by_label(&self, label: &str) -> Result<Option<String>, SyncError> {
            Ok(self.labels.lock().unwrap().get(label).cloned())
        }

        fn query_item_by_part_id(
            &self,
            _property: &str,
            _part_id: &str,
        ) -> Result<Option<String>, SyncError> {
            Ok(None)
        }

        fn list_properties(&self) -> Result<BTreeMap<String, String>, SyncError> {
            Ok(test_properties())
        }

        fn login(&mut self, _username: &str, _password: &str) -> Result<(), SyncError> {
            Ok(())
        }

        fn write_item(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
            self.writes.lock().unwrap().push(request.clone());
            match &request.item_id {
                Some(item_id) => Ok(WriteOutcome {
                    item_id: item_id.clone(),
                    action: WriteAction::Updated,
                }),
                None => {
                    let mut next = self.next_id.lock().unwrap();
                    let item_id = format!("Q{}", *next);
                    *next += 1;
                    if let Some(label) = &request.label {
                        self.labels
                            .lock()
                            .unwrap()
                            .insert(label.clone(), item_id.clone());
                    }
                    Ok(WriteOutcome {
                        item_id,
                        action: WriteAction::Created,
                    })
                }
            }
        }
    }

    fn test_properties() -> BTreeMap<String, String> {
        let labels = [
            vocab::PROP_INSTANCE_OF,
            vocab::PROP_PART_NAME,
            vocab::PROP_LONG_DESCRIPTION,
            vocab::PROP_AUTHOR,
            vocab::PROP_PART_TYPE,
            vocab::PROP_STATUS,
            vocab::PROP_PART_ID,
            vocab::PROP_RESTRICTION_SITE,
            vocab::PROP_SITE_POSITION,
            vocab::PROP_COMPATIBLE_WITH,
            vocab::PROP_INCOMPATIBLE_WITH,
            vocab::PROP_HOMOLOGY_HIT,
            vocab::PROP_BIT_SCORE,
            vocab::PROP_E_VALUE,
            vocab::PROP_ORGANISM,
            vocab::PROP_PROTEIN_NAME,
            vocab::PROP_EC_NUMBER,
            vocab::PROP_SEQUENCE,
            vocab::PROP_SEQUENCE_LENGTH,
            vocab::PROP_RETRIEVED,
            vocab::PROP_STATED_IN,
            vocab::PROP_REFERENCE_URL,
            vocab::PROP_DETERMINATION_METHOD,
            vocab::PROP_CONTAINS,
        ];
        labels
            .iter()
            .enumerate()
            .map(|(index, label)| (label.to_string(), format!("P{}", index + 1)))
            .collect()
    }

    fn test_record() -> PartRecord {
        let mut record = PartRecord::new("BBa_X0001".parse().unwrap());
        record.description = Some("test promoter".to_string());
        record.long_description = Some("a longer story".to_string());
        record.authors = vec!["Jane Doe".to_string(), "John Roe".to_string()];
        record.part_type = Some("Coding".to_string());
        record.status = Some("Available".to_string());
        record.nickname = Some("px1".to_string());
        record.part_id = Some("4242".to_string());
        record.sequence_length = Some(120);
        record
            .restriction_sites
            .insert("EcoRI".to_string(), vec![1, 9]);
        record.compatible = Some(vec!["RFC10".to_string()]);
        record.incompatible = Some(vec!["RFC21".to_string()]);
        record
            .extra
            .insert("uses".to_string(), "12".to_string());
        record
    }

    fn run_reconcile(client: &FakeWikibase, record: &PartRecord) -> WriteOutcome {
        let temp = tempfile::tempdir().unwrap();
        let cache_path = Utf8PathBuf::from_path_buf(temp.path().join("lookup.json")).unwrap();
        let properties = PropertyRegistry::from_map(test_properties());
        let mut items = LookupCache::load(&cache_path).unwrap();
        let mut ctx = ReconcileContext {
            client,
            properties: &properties,
            items: &mut items,
            part_page_base: "http://parts.example.org/Part:",
            sequence_url_base: "http://parts.example.org/putseq.cgi?part=",
        };
        Reconciler::new().unwrap().reconcile(record, &mut ctx).unwrap()
    }

    #[test]
    fn rule_table_is_valid() {
        assert!(Reconciler::new().is_ok());
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        let mut rules = rule_table();
        rules.push((field::AUTHORS, emit_nothing));
        assert_matches::assert_matches!(
            validate_rules(&rules),
            Err(SyncError::RuleTable(_))
        );
    }

    #[test]
    fn missing_rule_is_rejected() {
        let mut rules = rule_table();
        rules.retain(|(name, _)| *name != field::STATUS);
        assert_matches::assert_matches!(
            validate_rules(&rules),
            Err(SyncError::RuleTable(_))
        );
    }

    #[test]
    fn first_run_creates_second_updates() {
        let client = FakeWikibase::with_vocabulary();
        let record = test_record();

        let first = run_reconcile(&client, &record);
        assert_eq!(first.action, WriteAction::Created);
        let second = run_reconcile(&client, &record);
        assert_eq!(second.action, WriteAction::Updated);
        assert_eq!(second.item_id, first.item_id);

        let writes = client.writes.lock().unwrap();
        assert_eq!(writes[0].label.as_deref(), Some("BBa_X0001"));
        assert!(writes[1].label.is_none());
        assert_eq!(writes[1].item_id.as_deref(), Some(first.item_id.as_str()));
    }

    #[test]
    fn aliases_carry_part_id_and_nickname() {
        let client = FakeWikibase::with_vocabulary();
        run_reconcile(&client, &test_record());

        let writes = client.writes.lock().unwrap();
        assert!(writes[0].aliases.contains(&"px1".to_string()));
        assert!(writes[0].aliases.contains(&"4242".to_string()));
    }

    #[test]
    fn statements_cover_expected_fields() {
        let client = FakeWikibase::with_vocabulary();
        run_reconcile(&client, &test_record());

        let writes = client.writes.lock().unwrap();
        let claims = &writes[0].claims;
        // instance of, part name, long description, 2 authors, part
        // type, status, sequence, part id, EcoRI, RFC10, RFC21.
        assert_eq!(claims.len(), 12);
        assert_eq!(
            writes[0].description.as_deref(),
            Some("test promoter")
        );
    }

    #[test]
    fn instance_of_and_part_id_carry_provenance() {
        let client = FakeWikibase::with_vocabulary();
        run_reconcile(&client, &test_record());

        let writes = client.writes.lock().unwrap();
        let claims = &writes[0].claims;
        // instance of is always emitted first, sourced to the registry.
        assert_eq!(claims[0]["mainsnak"]["datavalue"]["value"]["id"], "Q1");
        assert!(claims[0].get("references").is_some());

        let part_id_claim = claims
            .iter()
            .find(|claim| claim["mainsnak"]["datavalue"]["value"] == "4242")
            .expect("part id claim present");
        assert!(part_id_claim.get("references").is_some());
        let qualifiers = part_id_claim
            .get("qualifiers-order")
            .and_then(|order| order.as_array())
            .expect("part id claim carries a retrieved date");
        assert_eq!(qualifiers.len(), 1);
    }

    #[test]
    fn homology_statement_carries_qualifiers() {
        let client = FakeWikibase::with_vocabulary();
        let mut record = PartRecord::new("BBa_H0001".parse().unwrap());
        record.description = Some("with homology".to_string());
        record.homology = Some(crate::domain::HomologyAnnotation {
            hit_number: 1,
            accession: "P00722".to_string(),
            bit_score: Some("201.4".to_string()),
            e_value: Some("3.1e-52".to_string()),
            protein_name: Some("Beta-galactosidase".to_string()),
            organism: Some("Escherichia coli".to_string()),
            ec_number: Some("3.2.1.23".to_string()),
            cross_references: BTreeMap::new(),
        });
        run_reconcile(&client, &record);

        let writes = client.writes.lock().unwrap();
        let homology_claim = writes[0]
            .claims
            .iter()
            .find(|claim| claim["mainsnak"]["datavalue"]["value"] == "P00722")
            .expect("homology claim present");
        assert!(homology_claim.get("qualifiers").is_some());
        assert!(homology_claim.get("references").is_some());
    }
}
