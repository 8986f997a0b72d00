use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::wikibase::WikibaseClient;

/// Label-to-item cache with an explicit lifecycle: loaded once per run,
/// consulted cache-aside during reconciliation, flushed at the end.
/// Misses are cached too (`None`), so a label known to be absent does
/// not get re-queried on every record that mentions it.
pub struct LookupCache {
    path: Utf8PathBuf,
    entries: BTreeMap<String, Option<String>>,
    dirty: bool,
}

impl LookupCache {
    /// Loads the cache from `path`; a missing file starts empty.
    pub fn load(path: &Utf8Path) -> Result<Self, SyncError> {
        let entries = if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| SyncError::Filesystem(format!("read lookup cache {path}: {err}")))?;
            serde_json::from_str(&content)
                .map_err(|err| SyncError::Filesystem(format!("parse lookup cache {path}: {err}")))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path, entries = entries.len(), "loaded lookup cache");
        Ok(Self {
            path: path.to_owned(),
            entries,
            dirty: false,
        })
    }

    /// Item id for `label`, from cache or a label query. The remote
    /// answer, positive or negative, is cached for the next run.
    pub fn resolve<W: WikibaseClient + ?Sized>(
        &mut self,
        client: &W,
        label: &str,
    ) -> Result<Option<String>, SyncError> {
        if let Some(cached) = self.entries.get(label) {
            return Ok(cached.clone());
        }
        let resolved = client.query_item_by_label(label)?;
        if resolved.is_none() {
            info!(label, "label not present in knowledge base");
        }
        self.entries.insert(label.to_string(), resolved.clone());
        self.dirty = true;
        Ok(resolved)
    }

    /// Like [`resolve`](Self::resolve), but a missing label is an error.
    /// Used for vocabulary items the reconciler cannot work without.
    pub fn resolve_required<W: WikibaseClient + ?Sized>(
        &mut self,
        client: &W,
        label: &str,
    ) -> Result<String, SyncError> {
        self.resolve(client, label)?
            .ok_or_else(|| SyncError::ResolveFailed {
                label: label.to_string(),
                message: "no item with this label".to_string(),
            })
    }

    /// Primes the cache for a batch of labels up front.
    pub fn resolve_all<W: WikibaseClient + ?Sized>(
        &mut self,
        client: &W,
        labels: &[&str],
    ) -> Result<(), SyncError> {
        for label in labels {
            self.resolve(client, label)?;
        }
        Ok(())
    }

    /// Persists the cache wholesale, atomically. A no-op when nothing
    /// changed since load.
    pub fn flush(&self) -> Result<(), SyncError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), self.path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        debug!(path = %self.path, entries = self.entries.len(), "flushed lookup cache");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn entry(&self, label: &str) -> Option<&Option<String>> {
        self.entries.get(label)
    }
}

/// Property labels to P-identifiers, fetched with one listing query per
/// run and never persisted; the property set is small and authoritative
/// only at the instance.
pub struct PropertyRegistry {
    properties: BTreeMap<String, String>,
}

impl PropertyRegistry {
    pub fn fetch<W: WikibaseClient + ?Sized>(client: &W) -> Result<Self, SyncError> {
        let properties = client.list_properties()?;
        info!(properties = properties.len(), "fetched property registry");
        Ok(Self { properties })
    }

    #[cfg(test)]
    pub(crate) fn from_map(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.properties.get(label).map(String::as_str)
    }

    /// Property id for `label`; a missing property is a configuration
    /// error at the instance, not a skippable condition.
    pub fn require(&self, label: &str) -> Result<&str, SyncError> {
        self.get(label).ok_or_else(|| SyncError::ResolveFailed {
            label: label.to_string(),
            message: "no property with this label".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use camino::Utf8PathBuf;

    use super::*;
    use crate::wikibase::{WriteOutcome, WriteRequest};

    struct CountingClient {
        queries: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                queries: AtomicUsize::new(0),
            }
        }
    }

    impl WikibaseClient for CountingClient {
        fn query_item_by_label(&self, label: &str) -> Result<Option<String>, SyncError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(match label {
                "promoter" => Some("Q11".to_string()),
                _ => None,
            })
        }

        fn query_item_by_part_id(
            &self,
            _property: &str,
            _part_id: &str,
        ) -> Result<Option<String>, SyncError> {
            Ok(None)
        }

        fn list_properties(&self) -> Result<BTreeMap<String, String>, SyncError> {
            let mut properties = BTreeMap::new();
            properties.insert("part name".to_string(), "P1".to_string());
            Ok(properties)
        }

        fn login(&mut self, _username: &str, _password: &str) -> Result<(), SyncError> {
            Ok(())
        }

        fn write_item(&self, _request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
            unreachable!("lookup never writes")
        }
    }

    fn temp_cache_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("lookup.json")).unwrap()
    }

    #[test]
    fn resolve_caches_hits_and_misses() {
        let temp = tempfile::tempdir().unwrap();
        let client = CountingClient::new();
        let mut cache = LookupCache::load(&temp_cache_path(&temp)).unwrap();

        assert_eq!(
            cache.resolve(&client, "promoter").unwrap().as_deref(),
            Some("Q11")
        );
        assert_eq!(cache.resolve(&client, "unknown").unwrap(), None);
        // Second round hits the cache, including the negative entry.
        assert_eq!(
            cache.resolve(&client, "promoter").unwrap().as_deref(),
            Some("Q11")
        );
        assert_eq!(cache.resolve(&client, "unknown").unwrap(), None);
        assert_eq!(client.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn flush_and_reload_preserves_negative_entries() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp_cache_path(&temp);
        let client = CountingClient::new();

        let mut cache = LookupCache::load(&path).unwrap();
        cache.resolve(&client, "promoter").unwrap();
        cache.resolve(&client, "unknown").unwrap();
        cache.flush().unwrap();

        let reloaded = LookupCache::load(&path).unwrap();
        assert_eq!(
            reloaded.entry("promoter"),
            Some(&Some("Q11".to_string()))
        );
        assert_eq!(reloaded.entry("unknown"), Some(&None));
    }

    #[test]
    fn resolve_required_fails_on_missing_label() {
        let temp = tempfile::tempdir().unwrap();
        let client = CountingClient::new();
        let mut cache = LookupCache::load(&temp_cache_path(&temp)).unwrap();

        let err = cache.resolve_required(&client, "unknown").unwrap_err();
        assert_matches::assert_matches!(err, SyncError::ResolveFailed { label, .. } if label == "unknown");
    }

    #[test]
    fn property_registry_require() {
        let client = CountingClient::new();
        let registry = PropertyRegistry::fetch(&client).unwrap();
        assert_eq!(registry.require("part name").unwrap(), "P1");
        assert!(registry.require("absent").is_err());
    }
}
