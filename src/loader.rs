// Batch Loader
//
// Collapses N entities into a constant number of remote calls per identity
// channel:
//
//   no knowledge-graph id:  pages by name (1 call) → items by canonical
//                           page title (1 call)
//   knowledge-graph id:     items by id (1 call) → pages by sitelink (1 call)
//
// Results are matched back by *resolved* identity (canonical title, merged
// item id), never by the key used in the request. A name or id that resolves
// to nothing leaves its entity unloaded; it does not fail the batch.

use crate::describers::{Describers, GraphEntity, PageSet};
use crate::entity::Entity;
use crate::error::Result;
use std::collections::HashSet;
use tracing::{debug, info};

/// What one `load` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub requested: usize,
    pub loaded: usize,
}

impl LoadSummary {
    pub fn missing(&self) -> usize {
        self.requested - self.loaded
    }
}

pub struct BatchLoader<'a> {
    describers: &'a Describers,
}

impl<'a> BatchLoader<'a> {
    pub fn new(describers: &'a Describers) -> Self {
        BatchLoader { describers }
    }

    pub fn load<'e>(&self, entities: impl IntoIterator<Item = &'e mut Entity>) -> Result<LoadSummary> {
        let mut entities: Vec<&'e mut Entity> = entities.into_iter().collect();
        if entities.is_empty() {
            return Ok(LoadSummary::default());
        }

        let mut by_id = Vec::new();
        let mut by_title = Vec::new();
        for (i, entity) in entities.iter().enumerate() {
            if entity.wikidata_id().is_some() {
                by_id.push(i);
            } else if entity.is_wiki_addressable() {
                by_title.push(i);
            }
        }
        debug!(
            total = entities.len(),
            by_id = by_id.len(),
            by_title = by_title.len(),
            "partitioned batch"
        );

        self.load_by_title(&mut entities, &by_title)?;
        self.load_by_id(&mut entities, &by_id)?;
        self.load_extra(&mut entities)?;

        let summary = LoadSummary {
            requested: entities.len(),
            loaded: entities.iter().filter(|e| e.is_loaded()).count(),
        };
        info!(
            requested = summary.requested,
            loaded = summary.loaded,
            "batch load complete"
        );
        Ok(summary)
    }

    // ========================================================================
    // ENCYCLOPEDIA-FIRST CHANNEL
    // ========================================================================

    fn load_by_title(&self, entities: &mut [&mut Entity], indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }

        let titles = unique(indices.iter().map(|&i| entities[i].wikipedia_title().to_string()));
        let pages: Option<PageSet> = match self.describers.encyclopedia() {
            Some(source) => Some(source.fetch_pages(&titles)?),
            None => None,
        };

        // Canonical title per entity; without an encyclopedia the name is
        // used as-is for the knowledge-graph lookup
        let resolved: Vec<Option<String>> = indices
            .iter()
            .map(|&i| {
                let requested = entities[i].wikipedia_title();
                match &pages {
                    Some(set) => set.find(requested).map(|p| p.title.clone()),
                    None => Some(requested.to_string()),
                }
            })
            .collect();

        let graph_titles = unique(resolved.iter().flatten().cloned());
        let graph: Vec<GraphEntity> = match self.describers.knowledge_graph() {
            Some(source) if !graph_titles.is_empty() => source.fetch_by_titles(&graph_titles)?,
            _ => Vec::new(),
        };

        for (slot, &i) in indices.iter().enumerate() {
            let Some(title) = resolved[slot].as_deref() else {
                debug!(name = entities[i].name(), "no encyclopedia page");
                continue;
            };
            let page = pages.as_ref().and_then(|set| set.find(title));
            let node = graph
                .iter()
                .find(|g| g.sitelink.as_deref() == Some(title))
                .or_else(|| {
                    let id = page.and_then(|p| p.wikidata_id.as_deref())?;
                    graph.iter().find(|g| g.answers(id))
                });

            let entity = &mut *entities[i];
            if let Some(page) = page {
                entity.absorb_page(page)?;
            }
            if let Some(node) = node {
                entity.absorb_graph(node)?;
            }
            if page.is_some() || node.is_some() {
                entity.mark_loaded();
            }
        }
        Ok(())
    }

    // ========================================================================
    // KNOWLEDGE-GRAPH-FIRST CHANNEL
    // ========================================================================

    fn load_by_id(&self, entities: &mut [&mut Entity], indices: &[usize]) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }

        let requested: Vec<String> = indices
            .iter()
            .map(|&i| entities[i].wikidata_id().unwrap_or_default().to_string())
            .collect();

        let graph: Vec<GraphEntity> = match self.describers.knowledge_graph() {
            Some(source) => source.fetch_by_ids(&unique(requested.iter().cloned()))?,
            None => Vec::new(),
        };
        let nodes: Vec<Option<&GraphEntity>> = requested
            .iter()
            .map(|id| graph.iter().find(|g| g.answers(id)))
            .collect();

        let titles = unique(nodes.iter().flatten().filter_map(|n| n.sitelink.clone()));
        let pages: Option<PageSet> = match self.describers.encyclopedia() {
            Some(source) if !titles.is_empty() => Some(source.fetch_pages(&titles)?),
            _ => None,
        };

        for (slot, &i) in indices.iter().enumerate() {
            let node = nodes[slot];
            let page = node
                .and_then(|n| n.sitelink.as_deref())
                .and_then(|title| pages.as_ref()?.find(title));

            let entity = &mut *entities[i];
            if let Some(node) = node {
                entity.absorb_graph(node)?;
            } else {
                debug!(id = requested[slot].as_str(), "no knowledge-graph item");
            }
            if let Some(page) = page {
                entity.absorb_page(page)?;
            }
            if node.is_some() || page.is_some() {
                entity.mark_loaded();
            }
        }
        Ok(())
    }

    // ========================================================================
    // OTHER SOURCES
    // ========================================================================

    /// One batched call per extra describer, for entities carrying an
    /// identity in that source.
    fn load_extra(&self, entities: &mut [&mut Entity]) -> Result<()> {
        for describer in self.describers.extra() {
            let source = describer.source();
            let targets: Vec<(usize, String)> = entities
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.id(source).map(|id| (i, id.to_string())))
                .collect();
            if targets.is_empty() {
                continue;
            }

            let identities: Vec<String> = targets.iter().map(|(_, id)| id.clone()).collect();
            let results = describer.get_many(&identities)?;

            for ((i, _), variables) in targets.iter().zip(results) {
                if let Some(variables) = variables {
                    let entity = &mut *entities[*i];
                    entity.update(variables)?;
                    entity.mark_loaded();
                }
            }
        }
        Ok(())
    }
}

/// De-duplicate while keeping first-seen order.
fn unique(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}

// ============================================================================
// TESTS
// ============================================================================
