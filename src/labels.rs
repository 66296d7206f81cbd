// 🏷️ Labels / Units Resolver
//
// Knowledge-graph claims reference properties, units and other items by
// opaque id. The resolver turns those ids into human labels, batching remote
// lookups and keeping one on-disk partition per facet:
//
//   <cache_dir>/properties.db
//   <cache_dir>/units.db
//   <cache_dir>/entities.db
//
// Each partition is a SQLite file with a single `labels(id, label)` table.
// Writes are read-merge-write without cross-process locking: two processes
// sharing a cache directory may lose each other's additions.

use crate::config::DEFAULT_MAX_IDS_PER_CALL;
use crate::error::Result;
use anyhow::Context;
use rusqlite::{params, Connection};
use serde_json::{Map, Value as Json};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// FACETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Properties,
    Units,
    Entities,
}

impl Facet {
    pub const ALL: [Facet; 3] = [Facet::Properties, Facet::Units, Facet::Entities];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::Properties => "properties",
            Facet::Units => "units",
            Facet::Entities => "entities",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.db", self.as_str())
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote lookup of labels for a chunk of ids. Ids without a label are
/// simply absent from the returned map.
pub trait LabelSource {
    fn fetch_labels(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

// ============================================================================
// ON-DISK PARTITION
// ============================================================================

/// One facet's SQLite file.
#[derive(Debug, Clone)]
pub struct LabelStore {
    path: PathBuf,
}

impl LabelStore {
    pub fn new(dir: &Path, facet: Facet) -> Self {
        LabelStore {
            path: dir.join(facet.file_name()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open label cache {}", self.path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS labels (
                id TEXT PRIMARY KEY,
                label TEXT NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }

    pub fn load(&self) -> anyhow::Result<HashMap<String, String>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT id, label FROM labels")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// Write the entries whose ids the file does not hold yet. Returns the
    /// number of rows written.
    pub fn persist(&self, labels: &HashMap<String, String>) -> anyhow::Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        let existing: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT id FROM labels")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<HashSet<_>, _>>()?;
            ids
        };

        let mut written = 0;
        for (id, label) in labels {
            if existing.contains(id) {
                continue;
            }
            tx.execute("INSERT INTO labels (id, label) VALUES (?1, ?2)", params![id, label])?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct LabelResolver {
    source: Box<dyn LabelSource>,
    cache_dir: Option<PathBuf>,
    labels: HashMap<Facet, HashMap<String, String>>,
    chunk_size: usize,
}

impl LabelResolver {
    /// New resolver. `cache_dir = None` runs uncached; a directory that
    /// cannot be created or read disables the cache with a warning.
    pub fn new(source: impl LabelSource + 'static, cache_dir: Option<&Path>) -> Self {
        let mut resolver = LabelResolver {
            source: Box::new(source),
            cache_dir: cache_dir.map(Path::to_path_buf),
            labels: HashMap::new(),
            chunk_size: DEFAULT_MAX_IDS_PER_CALL,
        };
        if let Err(e) = resolver.load_cache() {
            resolver.disable_cache(&e);
        }
        resolver
    }

    /// Builder: ids per remote call, capped at the API limit
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, DEFAULT_MAX_IDS_PER_CALL);
        self
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    fn load_cache(&mut self) -> anyhow::Result<()> {
        let Some(dir) = self.cache_dir.clone() else {
            return Ok(());
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        for facet in Facet::ALL {
            let stored = LabelStore::new(&dir, facet).load()?;
            debug!(facet = facet.as_str(), count = stored.len(), "label cache loaded");
            self.labels.insert(facet, stored);
        }
        Ok(())
    }

    fn disable_cache(&mut self, error: &anyhow::Error) {
        if self.cache_dir.take().is_some() {
            warn!(error = %format!("{:#}", error), "label cache unavailable, continuing uncached");
        }
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn label(&self, facet: Facet, id: &str) -> Option<&str> {
        self.labels.get(&facet)?.get(id).map(String::as_str)
    }

    pub fn property_label(&self, id: &str) -> Option<&str> {
        self.label(Facet::Properties, id)
    }

    pub fn unit_label(&self, id: &str) -> Option<&str> {
        self.label(Facet::Units, id)
    }

    pub fn entity_label(&self, id: &str) -> Option<&str> {
        self.label(Facet::Entities, id)
    }

    pub fn len(&self, facet: Facet) -> usize {
        self.labels.get(&facet).map_or(0, HashMap::len)
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Scan claim maps for referenced properties, units and items, and
    /// resolve the ones not cached yet.
    pub fn update_from<'a>(&mut self, claims: impl IntoIterator<Item = &'a Map<String, Json>>) -> Result<()> {
        let mut refs = ClaimRefs::default();
        for map in claims {
            refs.scan_claims(map);
        }

        self.resolve(Facet::Properties, &refs.properties)?;
        self.resolve(Facet::Units, &refs.units)?;
        self.resolve(Facet::Entities, &refs.entities)?;
        Ok(())
    }

    /// Resolve uncached `ids` in chunks and write the new ones through.
    pub fn resolve(&mut self, facet: Facet, ids: &[String]) -> Result<()> {
        let known = self.labels.entry(facet).or_default();
        let mut seen = HashSet::new();
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !known.contains_key(*id) && seen.insert(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut fetched = HashMap::new();
        for chunk in missing.chunks(self.chunk_size) {
            fetched.extend(self.source.fetch_labels(chunk)?);
        }
        debug!(facet = facet.as_str(), requested = missing.len(), resolved = fetched.len(), "labels resolved");

        self.persist(facet, &fetched);
        self.labels.entry(facet).or_default().extend(fetched);
        Ok(())
    }

    fn persist(&mut self, facet: Facet, fetched: &HashMap<String, String>) {
        if fetched.is_empty() {
            return;
        }
        let Some(dir) = self.cache_dir.as_deref() else {
            return;
        };
        match LabelStore::new(dir, facet).persist(fetched) {
            Ok(written) => debug!(facet = facet.as_str(), written, "label cache updated"),
            Err(e) => self.disable_cache(&e),
        }
    }
}

impl fmt::Debug for LabelResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelResolver")
            .field("cache_dir", &self.cache_dir)
            .field("chunk_size", &self.chunk_size)
            .field("properties", &self.len(Facet::Properties))
            .field("units", &self.len(Facet::Units))
            .field("entities", &self.len(Facet::Entities))
            .finish()
    }
}

// ============================================================================
// CLAIM SCANNING
// ============================================================================

#[derive(Debug, Default)]
struct ClaimRefs {
    properties: Vec<String>,
    units: Vec<String>,
    entities: Vec<String>,
}

impl ClaimRefs {
    fn scan_claims(&mut self, claims: &Map<String, Json>) {
        for (property, statements) in claims {
            self.properties.push(property.clone());
            for statement in statements.as_array().into_iter().flatten() {
                self.scan_snak(&statement["mainsnak"]);
                let Some(qualifiers) = statement.get("qualifiers").and_then(Json::as_object) else {
                    continue;
                };
                for (qualifier, snaks) in qualifiers {
                    self.properties.push(qualifier.clone());
                    for snak in snaks.as_array().into_iter().flatten() {
                        self.scan_snak(snak);
                    }
                }
            }
        }
    }

    fn scan_snak(&mut self, snak: &Json) {
        let datavalue = &snak["datavalue"];
        match datavalue["type"].as_str() {
            Some("quantity") => {
                if let Some(unit) = datavalue["value"]["unit"].as_str().and_then(unit_id) {
                    self.units.push(unit.to_string());
                }
            }
            Some("wikibase-entityid") => {
                if let Some(id) = entity_id(&datavalue["value"]) {
                    self.entities.push(id);
                }
            }
            _ => {}
        }
    }
}

/// Item id of a quantity unit URL; `None` for the dimensionless unit "1".
pub fn unit_id(unit: &str) -> Option<&str> {
    if unit == "1" {
        return None;
    }
    unit.rsplit('/').next().filter(|id| !id.is_empty())
}

/// Id of a `wikibase-entityid` value, with or without the `id` field.
pub fn entity_id(value: &Json) -> Option<String> {
    if let Some(id) = value["id"].as_str() {
        return Some(id.to_string());
    }
    let numeric = value["numeric-id"].as_u64()?;
    let prefix = match value["entity-type"].as_str() {
        Some("property") => "P",
        Some("lexeme") => "L",
        _ => "Q",
    };
    Some(format!("{}{}", prefix, numeric))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Labels every id as "label of <id>" and records each call.
    #[derive(Clone, Default)]
    struct EchoLabels {
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl LabelSource for EchoLabels {
        fn fetch_labels(&self, ids: &[String]) -> Result<HashMap<String, String>> {
            self.calls.borrow_mut().push(ids.to_vec());
            Ok(ids.iter().map(|id| (id.clone(), format!("label of {}", id))).collect())
        }
    }

    fn claims() -> Map<String, Json> {
        json!({
            "P1082": [{
                "mainsnak": {"snaktype": "value", "property": "P1082",
                    "datavalue": {"type": "quantity", "value": {"amount": "+2952301", "unit": "1"}}},
                "qualifiers": {"P585": [{"snaktype": "value", "property": "P585",
                    "datavalue": {"type": "time", "value": {"time": "+2022-01-01T00:00:00Z", "precision": 11}}}]},
                "rank": "normal"
            }],
            "P2046": [{
                "mainsnak": {"snaktype": "value", "property": "P2046",
                    "datavalue": {"type": "quantity", "value": {"amount": "+839", "unit": "http://www.wikidata.org/entity/Q712226"}}},
                "rank": "normal"
            }],
            "P17": [{
                "mainsnak": {"snaktype": "value", "property": "P17",
                    "datavalue": {"type": "wikibase-entityid", "value": {"entity-type": "item", "numeric-id": 212}}},
                "rank": "preferred"
            }]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_update_from_scans_every_facet() {
        let source = EchoLabels::default();
        let mut resolver = LabelResolver::new(source.clone(), None);

        resolver.update_from([&claims()]).unwrap();

        assert_eq!(resolver.property_label("P1082"), Some("label of P1082"));
        assert_eq!(resolver.property_label("P585"), Some("label of P585"));
        assert_eq!(resolver.unit_label("Q712226"), Some("label of Q712226"));
        assert_eq!(resolver.entity_label("Q212"), Some("label of Q212"));
        // Dimensionless unit is never looked up
        assert_eq!(resolver.len(Facet::Units), 1);
        // One call per facet
        assert_eq!(source.calls.borrow().len(), 3);

        // Already cached: no further calls
        resolver.update_from([&claims()]).unwrap();
        assert_eq!(source.calls.borrow().len(), 3);
    }

    #[test]
    fn test_resolve_chunks_by_api_limit() {
        let source = EchoLabels::default();
        let mut resolver = LabelResolver::new(source.clone(), None);
        let ids: Vec<String> = (1..=120).map(|n| format!("P{}", n)).collect();

        resolver.resolve(Facet::Properties, &ids).unwrap();

        let calls = source.calls.borrow();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|chunk| chunk.len() <= 50));
        assert_eq!(resolver.len(Facet::Properties), 120);
    }

    #[test]
    fn test_chunk_size_is_capped() {
        let source = EchoLabels::default();
        let mut resolver = LabelResolver::new(source.clone(), None).with_chunk_size(500);
        let ids: Vec<String> = (1..=60).map(|n| format!("Q{}", n)).collect();
        resolver.resolve(Facet::Entities, &ids).unwrap();
        assert_eq!(source.calls.borrow().len(), 2);
    }

    #[test]
    fn test_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = EchoLabels::default();
        let mut resolver = LabelResolver::new(first, Some(dir.path()));
        resolver.update_from([&claims()]).unwrap();
        assert!(resolver.is_cache_enabled());
        for facet in Facet::ALL {
            assert!(dir.path().join(facet.file_name()).exists());
        }

        let second = EchoLabels::default();
        let mut reloaded = LabelResolver::new(second.clone(), Some(dir.path()));
        assert_eq!(reloaded.unit_label("Q712226"), Some("label of Q712226"));
        reloaded.update_from([&claims()]).unwrap();
        assert!(second.calls.borrow().is_empty());
    }

    #[test]
    fn test_store_writes_only_new_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = LabelStore::new(dir.path(), Facet::Units);

        let mut labels = HashMap::new();
        labels.insert("Q11573".to_string(), "metre".to_string());
        labels.insert("Q712226".to_string(), "square kilometre".to_string());
        assert_eq!(store.persist(&labels).unwrap(), 2);

        labels.insert("Q828224".to_string(), "kilometre".to_string());
        assert_eq!(store.persist(&labels).unwrap(), 1);
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[test]
    fn test_unwritable_cache_dir_disables_cache() {
        // A regular file where the directory should be
        let file = tempfile::NamedTempFile::new().unwrap();
        let source = EchoLabels::default();
        let nested = file.path().join("labels");
        let mut resolver = LabelResolver::new(source, Some(nested.as_path()));

        assert!(!resolver.is_cache_enabled());
        resolver.update_from([&claims()]).unwrap();
        assert_eq!(resolver.property_label("P17"), Some("label of P17"));
    }

    #[test]
    fn test_unit_and_entity_ids() {
        assert_eq!(unit_id("http://www.wikidata.org/entity/Q712226"), Some("Q712226"));
        assert_eq!(unit_id("1"), None);
        assert_eq!(entity_id(&json!({"id": "Q1899"})), Some("Q1899".to_string()));
        assert_eq!(entity_id(&json!({"entity-type": "property", "numeric-id": 31})), Some("P31".to_string()));
        assert_eq!(entity_id(&json!({})), None);
    }
}
