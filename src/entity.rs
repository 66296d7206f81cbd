// 🌍 Entity, Link & List
//
// "Identity persists, values change": an Entity is a display name plus the
// identities it carries in each source, and a set of Variables keyed by
// attribute name. Entities are created unloaded (name only) and filled in by
// the batch loader.

use crate::describers::{Describers, GraphEntity, Page};
use crate::error::{RealityError, Result};
use crate::loader::{BatchLoader, LoadSummary};
use crate::value::Value;
use crate::variable::{Observation, Variable};
use anyhow::Context;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use tracing::debug;

/// Source name of the encyclopedia channel.
pub const WIKIPEDIA: &str = "wikipedia";

/// Source name of the knowledge-graph channel.
pub const WIKIDATA: &str = "wikidata";

// ============================================================================
// LINK
// ============================================================================

/// Unresolved reference to an entity living in a named source,
/// e.g. `wikidata:Q212` or `osm:123456`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    source: String,
    id: String,
    label: Option<String>,
}

impl Link {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Link {
            source: source.into(),
            id: id.into(),
            label: None,
        }
    }

    /// Builder: display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Label if known, otherwise the opaque id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Resolve lazily. `None` when the source does not know the id.
    pub fn load(&self, describers: &Describers) -> Result<Option<Entity>> {
        let mut entity = Entity::from_link(self);
        entity.load(describers)?;
        Ok(entity.is_loaded().then_some(entity))
    }
}

impl FromStr for Link {
    type Err = RealityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((source, id)) if !source.is_empty() && !id.is_empty() => Ok(Link::new(source, id)),
            _ => Err(RealityError::uncoercible(s, "link")),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

// ============================================================================
// ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    name: String,
    /// Source name → identity of this entity in that source
    ids: BTreeMap<String, String>,
    variables: BTreeMap<String, Variable>,
    loaded: bool,
}

impl Entity {
    /// Unloaded entity known by name only.
    pub fn new(name: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: identity in a source
    pub fn with_id(mut self, source: impl Into<String>, id: impl Into<String>) -> Self {
        self.ids.insert(source.into(), id.into());
        self
    }

    /// Unloaded stub for a link, named by its best available label.
    pub fn from_link(link: &Link) -> Self {
        Entity::new(link.display_name()).with_id(link.source(), link.id())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self, source: &str) -> Option<&str> {
        self.ids.get(source).map(String::as_str)
    }

    pub fn ids(&self) -> &BTreeMap<String, String> {
        &self.ids
    }

    pub fn wikidata_id(&self) -> Option<&str> {
        self.id(WIKIDATA)
    }

    /// Title used for encyclopedia lookups: the known page title, else the name.
    pub fn wikipedia_title(&self) -> &str {
        self.id(WIKIPEDIA).unwrap_or(&self.name)
    }

    /// Entities identified only in some other source (e.g. `osm:123`) are
    /// not looked up in the encyclopedia by their name.
    pub fn is_wiki_addressable(&self) -> bool {
        self.ids.is_empty() || self.ids.contains_key(WIKIPEDIA) || self.ids.contains_key(WIKIDATA)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Key under which a List treats two entities as the same thing.
    pub fn identity_key(&self) -> String {
        match self.wikidata_id() {
            Some(id) => format!("{}:{}", WIKIDATA, id),
            None => format!("title:{}", self.wikipedia_title().to_lowercase()),
        }
    }

    // ------------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------------

    /// Merge new variables into existing ones by name.
    pub fn update(&mut self, variables: Vec<Variable>) -> Result<()> {
        for variable in variables {
            match self.variables.get_mut(variable.name()) {
                Some(existing) => existing.update(variable)?,
                None => {
                    self.variables.insert(variable.name().to_string(), variable);
                }
            }
        }
        Ok(())
    }

    /// Variable by attribute name. Absence is normal and returns `None`.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Current value of an attribute.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name)?.current().map(|o| o.value())
    }

    /// Attribute access with implicit load of an unloaded entity.
    pub fn fetch(&mut self, name: &str, describers: &Describers) -> Result<Option<&Variable>> {
        if !self.loaded {
            self.load(describers)?;
        }
        Ok(self.get(name))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Load from every configured source (a batch of one).
    pub fn load(&mut self, describers: &Describers) -> Result<LoadSummary> {
        BatchLoader::new(describers).load(std::iter::once(self))
    }

    pub(crate) fn absorb_page(&mut self, page: &Page) -> Result<()> {
        self.ids.insert(WIKIPEDIA.to_string(), page.title.clone());
        if let Some(id) = &page.wikidata_id {
            self.ids.entry(WIKIDATA.to_string()).or_insert_with(|| id.clone());
        }
        self.update(page.variables.clone())
    }

    pub(crate) fn absorb_graph(&mut self, node: &GraphEntity) -> Result<()> {
        // Resolved id replaces the lookup key (merged items redirect)
        self.ids.insert(WIKIDATA.to_string(), node.id.clone());
        if let Some(title) = &node.sitelink {
            self.ids.entry(WIKIPEDIA.to_string()).or_insert_with(|| title.clone());
        }
        if let Some(label) = &node.label {
            if self.name.is_empty() || node.answers(&self.name) {
                self.name = label.clone();
            }
        }
        self.update(node.variables.clone())
    }

    /// Fold another record of the same item into this one. Ids already
    /// known here win; observations already present are not repeated.
    pub(crate) fn absorb_entity(&mut self, other: Entity) -> Result<()> {
        for (source, id) in other.ids {
            self.ids.entry(source).or_insert(id);
        }
        self.loaded |= other.loaded;

        for (name, variable) in other.variables {
            let fresh: Vec<Observation> = match self.variables.get(&name) {
                Some(existing) => variable
                    .observations()
                    .iter()
                    .filter(|o| !existing.observations().contains(o))
                    .cloned()
                    .collect(),
                None => variable.observations().to_vec(),
            };
            if !fresh.is_empty() {
                self.update(vec![Variable::new(name, fresh)])?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Current values reduced to plain JSON.
    pub fn to_h(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .variables
            .iter()
            .filter_map(|(name, var)| {
                var.current().map(|o| (name.clone(), o.value().to_plain()))
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Factory used at call sites: `entity("Argentina")`.
pub fn entity(name: impl Into<String>) -> Entity {
    Entity::new(name)
}

// ============================================================================
// LIST
// ============================================================================

/// Ordered entities, at most one per logical identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityList {
    entities: Vec<Entity>,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut list = EntityList::new();
        for entity in entities {
            list.push(entity);
        }
        list
    }

    /// Names → unloaded entities.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::from_entities(names.into_iter().map(Entity::new))
    }

    /// Append unless an entity with the same identity is present.
    pub fn push(&mut self, entity: Entity) -> bool {
        let key = entity.identity_key();
        if self.entities.iter().any(|e| e.identity_key() == key) {
            return false;
        }
        self.entities.push(entity);
        true
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Entity> {
        self.entities.iter_mut()
    }

    pub fn loaded_count(&self) -> usize {
        self.entities.iter().filter(|e| e.is_loaded()).count()
    }

    /// Batch-load every unloaded member.
    ///
    /// Members that resolve to the same item (aliases, merged ids) are
    /// folded into the first of them afterwards.
    pub fn load(&mut self, describers: &Describers) -> Result<LoadSummary> {
        let summary =
            BatchLoader::new(describers).load(self.entities.iter_mut().filter(|e| !e.is_loaded()))?;
        self.merge_duplicates()?;
        Ok(summary)
    }

    fn merge_duplicates(&mut self) -> Result<()> {
        let mut i = 1;
        while i < self.entities.len() {
            let key = self.entities[i].identity_key();
            match self.entities[..i].iter().position(|e| e.identity_key() == key) {
                Some(first) => {
                    let duplicate = self.entities.remove(i);
                    debug!(
                        name = duplicate.name(),
                        into = self.entities[first].name(),
                        key = key.as_str(),
                        "merging list members with the same identity"
                    );
                    self.entities[first].absorb_entity(duplicate)?;
                }
                None => i += 1,
            }
        }
        Ok(())
    }

    /// Attribute name → number of members with a value for it.
    pub fn coverage(&self) -> BTreeMap<String, usize> {
        let mut coverage = BTreeMap::new();
        for entity in &self.entities {
            for name in entity.variable_names() {
                *coverage.entry(name.to_string()).or_insert(0) += 1;
            }
        }
        coverage
    }

    /// Human-readable summary of loaded attribute coverage.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "#<List({} entities, {} loaded)>",
            self.len(),
            self.loaded_count()
        );
        for (name, count) in self.coverage() {
            out.push_str(&format!("\n  {}: {}/{}", name, count, self.len()));
        }
        out
    }

    pub fn to_h(&self) -> serde_json::Value {
        json!(self.entities.iter().map(Entity::to_h).collect::<Vec<_>>())
    }

    /// Export the current value of every attribute, one row per entity.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let columns: Vec<String> = self.coverage().into_keys().collect();
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = vec!["name".to_string()];
        header.extend(columns.iter().cloned());
        csv.write_record(&header).context("Failed to write CSV header")?;

        for entity in &self.entities {
            let mut row = vec![entity.name().to_string()];
            row.extend(
                columns
                    .iter()
                    .map(|c| entity.value(c).map(|v| v.to_string()).unwrap_or_default()),
            );
            csv.write_record(&row)
                .with_context(|| format!("Failed to write CSV row for {}", entity.name()))?;
        }

        csv.flush().context("Failed to flush CSV output")?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a EntityList {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describers::PageSet;
    use crate::measure::measure;
    use crate::test_support::{population, FakeEncyclopedia, FakeGraph};
    use chrono::{TimeZone, Utc};

    fn observed(year: i32, name: &str, value: Value, source: &str) -> Variable {
        let t = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap();
        Variable::single(name, Observation::new(t, value, source))
    }

    #[test]
    fn test_link_parse_and_display() {
        let link: Link = "wikidata:Q212".parse().unwrap();
        assert_eq!(link.source(), "wikidata");
        assert_eq!(link.id(), "Q212");
        assert_eq!(link.display_name(), "Q212");
        assert_eq!(link.to_string(), "wikidata:Q212");

        assert!("Q212".parse::<Link>().is_err());
        assert!("osm:".parse::<Link>().is_err());
    }

    #[test]
    fn test_entity_from_link() {
        let link = Link::new(WIKIDATA, "Q212").with_label("Ukraine");
        let e = Entity::from_link(&link);
        assert_eq!(e.name(), "Ukraine");
        assert_eq!(e.wikidata_id(), Some("Q212"));
        assert!(!e.is_loaded());
    }

    #[test]
    fn test_update_merges_by_name() {
        let mut e = entity("Kyiv");
        e.update(vec![observed(2010, "population", Value::Integer(100), WIKIDATA)]).unwrap();
        e.update(vec![
            observed(2020, "population", Value::Integer(110), WIKIPEDIA),
            observed(2020, "area", Value::from(measure(839, "km²")), WIKIPEDIA),
        ])
        .unwrap();

        assert_eq!(e.get("population").unwrap().len(), 2);
        assert_eq!(e.value("population"), Some(&Value::Integer(110)));
        assert_eq!(e.variable_names().collect::<Vec<_>>(), vec!["area", "population"]);
        assert!(e.get("mayor").is_none());
    }

    #[test]
    fn test_to_h_reduces_values() {
        let mut e = entity("Kyiv");
        e.update(vec![
            observed(2020, "population", Value::Integer(2_950_000), WIKIPEDIA),
            observed(2020, "country", Value::from(entity("Ukraine")), WIKIDATA),
        ])
        .unwrap();

        assert_eq!(e.to_h(), json!({"population": 2_950_000, "country": "Ukraine"}));
    }

    #[test]
    fn test_list_dedupes_by_identity() {
        let mut list = EntityList::from_names(["Kyiv", "kyiv", "Lviv"]);
        assert_eq!(list.len(), 2);

        assert!(list.push(entity("Kyiv (city)").with_id(WIKIDATA, "Q1899")));
        assert!(!list.push(entity("Kiev").with_id(WIKIDATA, "Q1899")));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_load_merges_members_resolving_to_same_item() {
        let kyiv_page = Page {
            title: "Kyiv".to_string(),
            wikidata_id: Some("Q1899".to_string()),
            variables: vec![population(2_950_000, WIKIPEDIA)],
        };
        let kyiv_node = GraphEntity {
            id: "Q1899".to_string(),
            label: Some("Kyiv".to_string()),
            sitelink: Some("Kyiv".to_string()),
            redirected_from: None,
            variables: vec![population(2_952_301, WIKIDATA)],
        };
        let describers = Describers::new()
            .with_encyclopedia(FakeEncyclopedia::new(
                PageSet::new(vec![kyiv_page]).with_alias("Kiev", "Kyiv"),
            ))
            .with_knowledge_graph(FakeGraph::new(vec![kyiv_node]));

        let mut list = EntityList::from_names(["Kiev", "Kyiv", "Lviv"]);
        assert_eq!(list.len(), 3);
        list.load(&describers).unwrap();

        let keys: Vec<String> = list.iter().map(Entity::identity_key).collect();
        assert_eq!(keys, vec!["wikidata:Q1899", "title:lviv"]);

        let kyiv = list.get(0).unwrap();
        assert_eq!(kyiv.name(), "Kiev");
        assert!(kyiv.is_loaded());
        assert_eq!(kyiv.wikipedia_title(), "Kyiv");
        assert_eq!(kyiv.get("population").unwrap().len(), 2);
        assert!(!list.get(1).unwrap().is_loaded());
    }

    #[test]
    fn test_absorb_entity_keeps_first_ids_and_new_observations() {
        let mut first = entity("Kiev").with_id(WIKIDATA, "Q1899");
        first.update(vec![observed(2020, "population", Value::Integer(1), WIKIDATA)]).unwrap();

        let mut second = entity("Kyiv")
            .with_id(WIKIDATA, "Q1899")
            .with_id(WIKIPEDIA, "Kyiv");
        second
            .update(vec![
                observed(2020, "population", Value::Integer(1), WIKIDATA),
                observed(2021, "population", Value::Integer(2), WIKIDATA),
                observed(2021, "area", Value::Measure(measure(839, "km²")), WIKIPEDIA),
            ])
            .unwrap();
        second.mark_loaded();

        first.absorb_entity(second).unwrap();
        assert_eq!(first.name(), "Kiev");
        assert_eq!(first.id(WIKIPEDIA), Some("Kyiv"));
        assert!(first.is_loaded());
        assert_eq!(first.get("population").unwrap().len(), 2);
        assert_eq!(first.value("population"), Some(&Value::Integer(2)));
        assert!(first.get("area").is_some());
    }

    #[test]
    fn test_describe_reports_coverage() {
        let mut kyiv = entity("Kyiv");
        kyiv.update(vec![observed(2020, "population", Value::Integer(1), WIKIDATA)]).unwrap();
        kyiv.mark_loaded();
        let list = EntityList::from_entities(vec![kyiv, entity("Lviv")]);

        let summary = list.describe();
        assert!(summary.starts_with("#<List(2 entities, 1 loaded)>"));
        assert!(summary.contains("population: 1/2"));
    }

    #[test]
    fn test_write_csv() {
        let mut kyiv = entity("Kyiv");
        kyiv.update(vec![observed(2020, "population", Value::Integer(2_950_000), WIKIDATA)]).unwrap();
        let list = EntityList::from_entities(vec![kyiv, entity("Lviv")]);

        let mut out = Vec::new();
        list.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "name,population\nKyiv,2950000\nLviv,\n");
    }
}
