// Describer registry
//
// Explicit, constructed registry of data sources. It is passed into entity
// and list loading instead of living in global state, so every source can be
// replaced by a test double.

use crate::error::Result;
use crate::variable::Variable;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Maximum redirect / normalization hops followed when resolving a title.
const MAX_ALIAS_HOPS: usize = 5;

// ============================================================================
// GENERIC DESCRIBER
// ============================================================================

/// A source that can describe one entity by its identity in that source.
pub trait Describer {
    /// Source name; also the key of the entity's identity for this source.
    fn source(&self) -> &str;

    /// Variables for `identity`, or `None` if the source does not know it.
    fn get(&self, identity: &str) -> Result<Option<Vec<Variable>>>;

    /// Batched form, one result per identity in request order.
    ///
    /// The batch loader calls this once per batch. The default issues one
    /// `get` per identity, so a remote source must override it with a single
    /// batched request or the batch costs one call per entity.
    fn get_many(&self, identities: &[String]) -> Result<Vec<Option<Vec<Variable>>>> {
        debug!(
            source = self.source(),
            count = identities.len(),
            "no batched lookup, describing one identity at a time"
        );
        identities.iter().map(|id| self.get(id)).collect()
    }
}

// ============================================================================
// ENCYCLOPEDIA CHANNEL
// ============================================================================

/// One encyclopedia page, already parsed into variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Canonical title after redirects and normalization
    pub title: String,
    /// Linked knowledge-graph item, when the page declares one
    pub wikidata_id: Option<String>,
    pub variables: Vec<Variable>,
}

/// Result of one batched page fetch.
///
/// Requested names can differ from canonical titles; `aliases` records every
/// `from → to` step the remote reported (normalization and redirects).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSet {
    pages: Vec<Page>,
    aliases: HashMap<String, String>,
}

impl PageSet {
    pub fn new(pages: Vec<Page>) -> Self {
        PageSet {
            pages,
            aliases: HashMap::new(),
        }
    }

    /// Builder: record that `from` resolves to `to`
    pub fn with_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.add_alias(from, to);
        self
    }

    pub fn push(&mut self, page: Page) {
        self.pages.push(page);
    }

    pub fn add_alias(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.aliases.insert(from.into(), to.into());
    }

    /// Canonical title for a requested name.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    /// Page for a requested name or canonical title; `None` if missing.
    pub fn find(&self, name: &str) -> Option<&Page> {
        let title = self.resolve(name);
        self.pages.iter().find(|p| p.title == title)
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Encyclopedia side: pages by title, one call per batch.
pub trait EncyclopediaSource {
    fn fetch_pages(&self, titles: &[String]) -> Result<PageSet>;
}

// ============================================================================
// KNOWLEDGE-GRAPH CHANNEL
// ============================================================================

/// One knowledge-graph item, already decoded into variables.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEntity {
    pub id: String,
    pub label: Option<String>,
    /// Title of the linked encyclopedia page
    pub sitelink: Option<String>,
    /// Requested id when the remote followed a merge redirect
    pub redirected_from: Option<String>,
    pub variables: Vec<Variable>,
}

impl GraphEntity {
    /// True if this item answers a request for `id`.
    pub fn answers(&self, id: &str) -> bool {
        self.id == id || self.redirected_from.as_deref() == Some(id)
    }
}

/// Knowledge-graph side: items by id or by linked page title.
pub trait KnowledgeGraphSource {
    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphEntity>>;
    fn fetch_by_titles(&self, titles: &[String]) -> Result<Vec<GraphEntity>>;
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Default)]
pub struct Describers {
    encyclopedia: Option<Box<dyn EncyclopediaSource>>,
    knowledge_graph: Option<Box<dyn KnowledgeGraphSource>>,
    extra: Vec<Box<dyn Describer>>,
}

impl Describers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: encyclopedia channel
    pub fn with_encyclopedia(mut self, source: impl EncyclopediaSource + 'static) -> Self {
        self.encyclopedia = Some(Box::new(source));
        self
    }

    /// Builder: knowledge-graph channel
    pub fn with_knowledge_graph(mut self, source: impl KnowledgeGraphSource + 'static) -> Self {
        self.knowledge_graph = Some(Box::new(source));
        self
    }

    /// Builder: additional per-source describer
    pub fn with_describer(mut self, describer: impl Describer + 'static) -> Self {
        self.extra.push(Box::new(describer));
        self
    }

    pub fn encyclopedia(&self) -> Option<&dyn EncyclopediaSource> {
        self.encyclopedia.as_deref()
    }

    pub fn knowledge_graph(&self) -> Option<&dyn KnowledgeGraphSource> {
        self.knowledge_graph.as_deref()
    }

    pub fn extra(&self) -> impl Iterator<Item = &dyn Describer> {
        self.extra.iter().map(|d| d.as_ref())
    }

    /// Wire the real encyclopedia and knowledge-graph sources.
    #[cfg(feature = "http")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        use crate::http::ApiClient;
        use crate::labels::LabelResolver;
        use crate::wikidata::{Wikidata, WikidataLabels};
        use crate::wikipedia::Wikipedia;
        use std::sync::Arc;

        let wikipedia_client = Arc::new(ApiClient::new(&config.wikipedia_endpoint, config)?);
        let wikidata_client = Arc::new(ApiClient::new(&config.wikidata_endpoint, config)?);

        let labels = LabelResolver::new(
            WikidataLabels::new(wikidata_client.clone(), &config.language),
            config.cache_dir.as_deref(),
        )
        .with_chunk_size(config.max_ids_per_call);

        Ok(Describers::new()
            .with_encyclopedia(Wikipedia::new(wikipedia_client, config))
            .with_knowledge_graph(Wikidata::new(wikidata_client, labels, config)))
    }
}

impl fmt::Debug for Describers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Describers")
            .field("encyclopedia", &self.encyclopedia.is_some())
            .field("knowledge_graph", &self.knowledge_graph.is_some())
            .field("extra", &self.extra.iter().map(|d| d.source()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::population;

    fn page(title: &str) -> Page {
        Page {
            title: title.to_string(),
            wikidata_id: None,
            variables: vec![],
        }
    }

    #[test]
    fn test_page_set_follows_aliases() {
        let set = PageSet::new(vec![page("Kharkiv")])
            .with_alias("kharkov", "Kharkov")
            .with_alias("Kharkov", "Kharkiv");

        assert_eq!(set.resolve("kharkov"), "Kharkiv");
        assert_eq!(set.find("kharkov").unwrap().title, "Kharkiv");
        assert_eq!(set.find("Kharkiv").unwrap().title, "Kharkiv");
        assert!(set.find("Atlantis").is_none());
    }

    #[test]
    fn test_page_set_alias_cycle_terminates() {
        let set = PageSet::new(vec![]).with_alias("A", "B").with_alias("B", "A");
        assert!(set.find("A").is_none());
    }

    #[test]
    fn test_graph_entity_answers_redirected_id() {
        let node = GraphEntity {
            id: "Q1899".into(),
            label: Some("Kyiv".into()),
            sitelink: Some("Kyiv".into()),
            redirected_from: Some("Q123".into()),
            variables: vec![],
        };
        assert!(node.answers("Q1899"));
        assert!(node.answers("Q123"));
        assert!(!node.answers("Q1"));
    }

    /// Answers from a fixed table through `get` only.
    struct Gazetteer {
        lookups: std::cell::Cell<usize>,
    }

    impl Describer for Gazetteer {
        fn source(&self) -> &str {
            "gazetteer"
        }

        fn get(&self, identity: &str) -> Result<Option<Vec<Variable>>> {
            self.lookups.set(self.lookups.get() + 1);
            Ok(match identity {
                "kyiv" => Some(vec![population(2_952_301, "gazetteer")]),
                "lviv" => Some(vec![]),
                _ => None,
            })
        }
    }

    #[test]
    fn test_default_get_many_keeps_identity_order() {
        let gazetteer = Gazetteer {
            lookups: std::cell::Cell::new(0),
        };
        let identities: Vec<String> = ["lviv", "atlantis", "kyiv"].iter().map(|s| s.to_string()).collect();

        let results = gazetteer.get_many(&identities).unwrap();
        assert_eq!(
            results,
            vec![Some(vec![]), None, Some(vec![population(2_952_301, "gazetteer")])]
        );
        assert_eq!(gazetteer.lookups.get(), 3);
    }

    #[test]
    fn test_registry_debug_lists_sources() {
        let describers = Describers::new();
        let debug = format!("{:?}", describers);
        assert!(debug.contains("encyclopedia: false"));
    }
}
