use tracing::{info, warn};

use crate::assembly::{self, LinkContext, LinkSummary};
use crate::config::ResolvedConfig;
use crate::error::SyncError;
use crate::homology::{self, Aligner, UniprotClient};
use crate::lookup::{LookupCache, PropertyRegistry};
use crate::reconcile::{ReconcileContext, Reconciler, vocab};
use crate::registry::{self, Normalizer};
use crate::staging::{self, StageStatus};
use crate::wikibase::WikibaseClient;

/// Vocabulary labels every run needs; primed into the lookup cache up
/// front so the per-record loop mostly runs off cached entries.
const VOCABULARY_ITEMS: &[&str] = &[
    vocab::ITEM_BIOLOGICAL_PART,
    vocab::ITEM_PARTS_REGISTRY,
    vocab::ITEM_TREMBL,
    vocab::ITEM_DIAMOND,
    vocab::ITEM_SEQUENCE_TOOLKIT,
];

/// Outcome counts for one pipeline run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub normalized: usize,
    pub reconciled: usize,
    pub failed: usize,
}

/// The whole sync pipeline over its three remote seams. Concrete
/// clients in production, in-process fakes in tests.
pub struct Pipeline<W, U, A> {
    config: ResolvedConfig,
    wikibase: W,
    uniprot: U,
    aligner: A,
}

impl<W, U, A> Pipeline<W, U, A>
where
    W: WikibaseClient,
    U: UniprotClient,
    A: Aligner,
{
    pub fn new(config: ResolvedConfig, wikibase: W, uniprot: U, aligner: A) -> Self {
        Self {
            config,
            wikibase,
            uniprot,
            aligner,
        }
    }

    /// Full run from the export file: normalize into the temp stage,
    /// align the FASTA batch, then enrich and publish record by record.
    /// A record that fails stays staged in both directories and the run
    /// moves on; a rerun in staged mode picks it back up.
    pub fn run_fresh(&mut self, username: &str, password: &str) -> Result<RunSummary, SyncError> {
        staging::clear(&self.config.final_dir)?;
        self.wikibase.login(username, password)?;

        let mut summary = RunSummary::default();
        let normalizer = Normalizer::new(self.config.fasta_batch.clone());
        let rows = registry::read_export(&self.config.registry_export)?;
        info!(rows = rows.len(), "parsed registry export");
        for row in &rows {
            if let Some(record) = normalizer.normalize(row)? {
                staging::stage(&record, StageStatus::Normalized, &self.config.temp_dir)?;
                summary.normalized += 1;
            }
        }
        info!(records = summary.normalized, "normalized into temp stage");

        if self.config.alignment_report.as_std_path().exists() {
            warn!(report = %self.config.alignment_report, "alignment report already present, reusing it");
        } else if self.config.fasta_batch.as_std_path().exists() {
            self.aligner
                .align(&self.config.fasta_batch, &self.config.alignment_report)?;
        } else {
            info!("no sequences collected, skipping alignment");
        }

        let hits = if self.config.alignment_report.as_std_path().exists() {
            homology::read_report(&self.config.alignment_report)?
        } else {
            Default::default()
        };

        let reconciler = Reconciler::new()?;
        let properties = PropertyRegistry::fetch(&self.wikibase)?;
        let mut items = LookupCache::load(&self.config.lookup_cache)?;
        items.resolve_all(&self.wikibase, VOCABULARY_ITEMS)?;

        for staged in staging::load_all(&self.config.temp_dir)? {
            let mut record = staged.record;
            let dropped = record.drop_oversized(self.config.max_value_len);
            if !dropped.is_empty() {
                info!(part = %record.part_name, fields = ?dropped, "dropped oversized fields");
            }

            let result = homology::enrich(&mut record, &hits, &self.uniprot).and_then(|()| {
                staging::stage(&record, StageStatus::Enriched, &self.config.final_dir)?;
                let mut ctx = ReconcileContext {
                    client: &self.wikibase,
                    properties: &properties,
                    items: &mut items,
                    part_page_base: &self.config.part_page_base,
                    sequence_url_base: &self.config.sequence_url_base,
                };
                reconciler.reconcile(&record, &mut ctx)
            });

            match result {
                Ok(_) => {
                    staging::stage(&record, StageStatus::Reconciled, &self.config.final_dir)?;
                    staging::remove(&record.part_name, &self.config.temp_dir)?;
                    summary.reconciled += 1;
                }
                Err(err) => {
                    warn!(part = %record.part_name, error = %err, "record failed, left staged");
                    summary.failed += 1;
                }
            }
        }

        items.flush()?;
        info!(?summary, "fresh run complete");
        Ok(summary)
    }

    /// Retry run over whatever sits in the final stage, without touching
    /// the export or the aligner.
    pub fn run_staged(&mut self, username: &str, password: &str) -> Result<RunSummary, SyncError> {
        self.wikibase.login(username, password)?;

        let reconciler = Reconciler::new()?;
        let properties = PropertyRegistry::fetch(&self.wikibase)?;
        let mut items = LookupCache::load(&self.config.lookup_cache)?;
        items.resolve_all(&self.wikibase, VOCABULARY_ITEMS)?;

        let mut summary = RunSummary::default();
        for staged in staging::load_all(&self.config.final_dir)? {
            let record = staged.record;
            let mut ctx = ReconcileContext {
                client: &self.wikibase,
                properties: &properties,
                items: &mut items,
                part_page_base: &self.config.part_page_base,
                sequence_url_base: &self.config.sequence_url_base,
            };
            match reconciler.reconcile(&record, &mut ctx) {
                Ok(_) => {
                    staging::stage(&record, StageStatus::Reconciled, &self.config.final_dir)?;
                    staging::remove(&record.part_name, &self.config.temp_dir).ok();
                    summary.reconciled += 1;
                }
                Err(err) => {
                    warn!(part = %record.part_name, error = %err, "record failed, left staged");
                    summary.failed += 1;
                }
            }
        }

        items.flush()?;
        info!(?summary, "staged run complete");
        Ok(summary)
    }

    /// The contains-linkage pass over reconciled blobs.
    pub fn run_link(&mut self, username: &str, password: &str) -> Result<LinkSummary, SyncError> {
        self.wikibase.login(username, password)?;
        let properties = PropertyRegistry::fetch(&self.wikibase)?;
        let mut items = LookupCache::load(&self.config.lookup_cache)?;
        let mut ctx = LinkContext {
            client: &self.wikibase,
            properties: &properties,
            items: &mut items,
            part_page_base: &self.config.part_page_base,
            final_dir: &self.config.final_dir,
            linked_dir: &self.config.linked_dir,
            self_contain_max_tokens: self.config.self_contain_max_tokens,
        };
        let summary = assembly::run_link(&mut ctx)?;
        items.flush()?;
        info!(?summary, "link pass complete");
        Ok(summary)
    }
}
