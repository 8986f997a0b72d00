use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::lookup::{LookupCache, PropertyRegistry};
use crate::reconcile::vocab;
use crate::staging;
use crate::statement::{Reference, Snak, SnakValue, Statement, retrieved_qualifier};
use crate::wikibase::{WikibaseClient, WriteRequest};

pub struct LinkContext<'a> {
    pub client: &'a dyn WikibaseClient,
    pub properties: &'a PropertyRegistry,
    pub items: &'a mut LookupCache,
    pub part_page_base: &'a str,
    pub final_dir: &'a Utf8Path,
    pub linked_dir: &'a Utf8Path,
    /// An underscore list with this many tokens or fewer only names the
    /// part itself; such records link nothing and complete immediately.
    pub self_contain_max_tokens: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub linked: usize,
    pub skipped: usize,
}

/// Second pass over reconciled blobs: turns each composite part's
/// underscore list of constituent part ids into `contains` statements
/// on the already-written item. A record whose children cannot all be
/// resolved stays staged for the next run; completed records move to
/// the linked directory.
pub fn run_link(ctx: &mut LinkContext<'_>) -> Result<LinkSummary, SyncError> {
    let contains = ctx.properties.require(vocab::PROP_CONTAINS)?.to_string();
    let part_id_property = ctx.properties.require(vocab::PROP_PART_ID)?.to_string();
    let stated_in = ctx.properties.require(vocab::PROP_STATED_IN)?.to_string();
    let reference_url = ctx
        .properties
        .require(vocab::PROP_REFERENCE_URL)?
        .to_string();
    let retrieved_property = ctx.properties.require(vocab::PROP_RETRIEVED)?.to_string();
    let registry = ctx
        .items
        .resolve_required(ctx.client, vocab::ITEM_PARTS_REGISTRY)?;

    let mut summary = LinkSummary::default();
    for staged in staging::load_all(ctx.final_dir)? {
        let record = &staged.record;
        let Some(deep_u_list) = &record.deep_u_list else {
            // Nothing to link; the record is complete as written.
            staging::promote(&record.part_name, ctx.final_dir, ctx.linked_dir)?;
            summary.linked += 1;
            continue;
        };

        let tokens: Vec<&str> = deep_u_list.split('_').filter(|t| !t.is_empty()).collect();
        if tokens.len() <= ctx.self_contain_max_tokens {
            debug!(part = %record.part_name, "underscore list only references the part itself");
            staging::promote(&record.part_name, ctx.final_dir, ctx.linked_dir)?;
            summary.linked += 1;
            continue;
        }

        let Some(item_id) = ctx.client.query_item_by_label(record.part_name.as_str())? else {
            warn!(part = %record.part_name, "no item for composite part, leaving staged");
            summary.skipped += 1;
            continue;
        };

        let mut children = Vec::new();
        let mut unresolved = None;
        for token in &tokens {
            if record.part_id.as_deref() == Some(*token) {
                continue;
            }
            // Single characters are scar tokens, not part ids.
            if token.len() <= 1 {
                debug!(part = %record.part_name, token, "skipping non-id token");
                continue;
            }
            match ctx.client.query_item_by_part_id(&part_id_property, token)? {
                Some(child) => {
                    if !children.contains(&child) {
                        children.push(child);
                    }
                }
                None => {
                    unresolved = Some(token.to_string());
                    break;
                }
            }
        }
        if let Some(token) = unresolved {
            warn!(part = %record.part_name, child = %token, "constituent part not in knowledge base, leaving staged");
            summary.skipped += 1;
            continue;
        }

        // Same provenance as the export-derived statements: stated in
        // the registry, the composite's page as the URL, dated.
        let reference: Reference = vec![
            Snak::new(stated_in.clone(), SnakValue::Item(registry.clone())),
            Snak::new(
                reference_url.clone(),
                SnakValue::Url(format!("{}{}", ctx.part_page_base, record.part_name)),
            ),
        ];
        let claims = children
            .iter()
            .map(|child| {
                Statement::new(Snak::new(contains.clone(), SnakValue::Item(child.clone())))
                    .with_qualifiers(vec![retrieved_qualifier(&retrieved_property)])
                    .with_references(vec![reference.clone()])
                    .to_claim_json()
            })
            .collect();
        let request = WriteRequest {
            item_id: Some(item_id),
            claims,
            ..WriteRequest::default()
        };
        ctx.client.write_item(&request)?;
        staging::promote(&record.part_name, ctx.final_dir, ctx.linked_dir)?;
        info!(part = %record.part_name, children = children.len(), "linked constituents");
        summary.linked += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::PartRecord;
    use crate::staging::StageStatus;
    use crate::wikibase::{WriteAction, WriteOutcome};

    struct FakeWikibase {
        part_ids: BTreeMap<String, String>,
        writes: Mutex<Vec<WriteRequest>>,
    }

    impl WikibaseClient for FakeWikibase {
        fn query_item_by_label(&self, label: &str) -> Result<Option<String>, SyncError> {
            Ok(match label {
                "BBa_K100" => Some("Q100".to_string()),
                vocab::ITEM_PARTS_REGISTRY => Some("Q2".to_string()),
                _ => None,
            })
        }

        fn query_item_by_part_id(
            &self,
            _property: &str,
            part_id: &str,
        ) -> Result<Option<String>, SyncError> {
            Ok(self.part_ids.get(part_id).cloned())
        }

        fn list_properties(&self) -> Result<BTreeMap<String, String>, SyncError> {
            Ok(BTreeMap::new())
        }

        fn login(&mut self, _username: &str, _password: &str) -> Result<(), SyncError> {
            Ok(())
        }

        fn write_item(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
            self.writes.lock().unwrap().push(request.clone());
            Ok(WriteOutcome {
                item_id: request.item_id.clone().unwrap(),
                action: WriteAction::Updated,
            })
        }
    }

    fn properties() -> PropertyRegistry {
        let mut map = BTreeMap::new();
        map.insert(vocab::PROP_CONTAINS.to_string(), "P40".to_string());
        map.insert(vocab::PROP_PART_ID.to_string(), "P7".to_string());
        map.insert(vocab::PROP_STATED_IN.to_string(), "P21".to_string());
        map.insert(vocab::PROP_REFERENCE_URL.to_string(), "P22".to_string());
        map.insert(vocab::PROP_RETRIEVED.to_string(), "P20".to_string());
        PropertyRegistry::from_map(map)
    }

    fn dirs(temp: &tempfile::TempDir) -> (Utf8PathBuf, Utf8PathBuf) {
        (
            Utf8PathBuf::from_path_buf(temp.path().join("final")).unwrap(),
            Utf8PathBuf::from_path_buf(temp.path().join("linked")).unwrap(),
        )
    }

    fn cache(temp: &tempfile::TempDir) -> LookupCache {
        let path = Utf8PathBuf::from_path_buf(temp.path().join("lookup.json")).unwrap();
        LookupCache::load(&path).unwrap()
    }

    fn composite(name: &str, part_id: &str, list: &str) -> PartRecord {
        let mut record = PartRecord::new(name.parse().unwrap());
        record.part_id = Some(part_id.to_string());
        record.deep_u_list = Some(list.to_string());
        record
    }

    #[test]
    fn short_list_is_a_no_op_promotion() {
        let temp = tempfile::tempdir().unwrap();
        let (final_dir, linked_dir) = dirs(&temp);
        let record = composite("BBa_K100", "100", "a_b_c");
        staging::stage(&record, StageStatus::Reconciled, &final_dir).unwrap();

        let client = FakeWikibase {
            part_ids: BTreeMap::new(),
            writes: Mutex::new(Vec::new()),
        };
        let registry = properties();
        let mut items = cache(&temp);
        let mut ctx = LinkContext {
            client: &client,
            properties: &registry,
            items: &mut items,
            part_page_base: "http://parts.example.org/Part:",
            final_dir: &final_dir,
            linked_dir: &linked_dir,
            self_contain_max_tokens: 3,
        };
        let summary = run_link(&mut ctx).unwrap();

        assert_eq!(summary, LinkSummary { linked: 1, skipped: 0 });
        assert!(client.writes.lock().unwrap().is_empty());
        assert!(staging::load_all(&final_dir).unwrap().is_empty());
        assert_eq!(staging::load_all(&linked_dir).unwrap().len(), 1);
    }

    #[test]
    fn resolved_children_become_contains_claims() {
        let temp = tempfile::tempdir().unwrap();
        let (final_dir, linked_dir) = dirs(&temp);
        let record = composite("BBa_K100", "100", "100_200_300_400");
        staging::stage(&record, StageStatus::Reconciled, &final_dir).unwrap();

        let mut part_ids = BTreeMap::new();
        part_ids.insert("200".to_string(), "Q200".to_string());
        part_ids.insert("300".to_string(), "Q300".to_string());
        part_ids.insert("400".to_string(), "Q400".to_string());
        let client = FakeWikibase {
            part_ids,
            writes: Mutex::new(Vec::new()),
        };
        let registry = properties();
        let mut items = cache(&temp);
        let mut ctx = LinkContext {
            client: &client,
            properties: &registry,
            items: &mut items,
            part_page_base: "http://parts.example.org/Part:",
            final_dir: &final_dir,
            linked_dir: &linked_dir,
            self_contain_max_tokens: 3,
        };
        let summary = run_link(&mut ctx).unwrap();

        assert_eq!(summary, LinkSummary { linked: 1, skipped: 0 });
        let writes = client.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].item_id.as_deref(), Some("Q100"));
        // Own part id is skipped, the three children remain.
        assert_eq!(writes[0].claims.len(), 3);
        for claim in &writes[0].claims {
            let reference = &claim["references"][0];
            assert_eq!(reference["snaks"]["P21"][0]["datavalue"]["value"]["id"], "Q2");
            assert_eq!(
                reference["snaks"]["P22"][0]["datavalue"]["value"],
                "http://parts.example.org/Part:BBa_K100"
            );
            assert_eq!(claim["qualifiers-order"], serde_json::json!(["P20"]));
        }
        assert_eq!(staging::load_all(&linked_dir).unwrap().len(), 1);
    }

    #[test]
    fn scar_tokens_do_not_block_linking() {
        let temp = tempfile::tempdir().unwrap();
        let (final_dir, linked_dir) = dirs(&temp);
        let record = composite("BBa_K100", "100", "100_200_300_400_5");
        staging::stage(&record, StageStatus::Reconciled, &final_dir).unwrap();

        let mut part_ids = BTreeMap::new();
        part_ids.insert("200".to_string(), "Q200".to_string());
        part_ids.insert("300".to_string(), "Q300".to_string());
        part_ids.insert("400".to_string(), "Q400".to_string());
        let client = FakeWikibase {
            part_ids,
            writes: Mutex::new(Vec::new()),
        };
        let registry = properties();
        let mut items = cache(&temp);
        let mut ctx = LinkContext {
            client: &client,
            properties: &registry,
            items: &mut items,
            part_page_base: "http://parts.example.org/Part:",
            final_dir: &final_dir,
            linked_dir: &linked_dir,
            self_contain_max_tokens: 3,
        };
        let summary = run_link(&mut ctx).unwrap();

        // The "5" token is a scar, not an unresolvable child.
        assert_eq!(summary, LinkSummary { linked: 1, skipped: 0 });
        let writes = client.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].claims.len(), 3);
        assert_eq!(staging::load_all(&linked_dir).unwrap().len(), 1);
    }

    #[test]
    fn missing_child_leaves_record_staged() {
        let temp = tempfile::tempdir().unwrap();
        let (final_dir, linked_dir) = dirs(&temp);
        let record = composite("BBa_K100", "100", "100_200_300_999");
        staging::stage(&record, StageStatus::Reconciled, &final_dir).unwrap();

        let mut part_ids = BTreeMap::new();
        part_ids.insert("200".to_string(), "Q200".to_string());
        part_ids.insert("300".to_string(), "Q300".to_string());
        let client = FakeWikibase {
            part_ids,
            writes: Mutex::new(Vec::new()),
        };
        let registry = properties();
        let mut items = cache(&temp);
        let mut ctx = LinkContext {
            client: &client,
            properties: &registry,
            items: &mut items,
            part_page_base: "http://parts.example.org/Part:",
            final_dir: &final_dir,
            linked_dir: &linked_dir,
            self_contain_max_tokens: 3,
        };
        let summary = run_link(&mut ctx).unwrap();

        assert_eq!(summary, LinkSummary { linked: 0, skipped: 1 });
        assert!(client.writes.lock().unwrap().is_empty());
        assert_eq!(staging::load_all(&final_dir).unwrap().len(), 1);
        assert!(staging::load_all(&linked_dir).unwrap().is_empty());
    }
}
