// Test doubles shared by the unit tests

use crate::describers::{Describer, EncyclopediaSource, GraphEntity, KnowledgeGraphSource, PageSet};
use crate::error::Result;
use crate::http::{HttpClient, Params};
use crate::value::Value;
use crate::variable::{Observation, Variable};
use chrono::{TimeZone, Utc};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Mutex;

/// `population` observed at 2020-01-01 by `source`.
pub fn population(value: i64, source: &str) -> Variable {
    let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    Variable::single("population", Observation::new(t, Value::Integer(value), source))
}

// ============================================================================
// HTTP
// ============================================================================

/// Replays canned bodies in order and records every request.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Params>>,
}

impl ScriptedClient {
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        ScriptedClient {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Params> {
        self.requests.lock().unwrap().clone()
    }

    fn reply(&self, params: &Params) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(params.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

impl HttpClient for ScriptedClient {
    fn get(&self, params: &Params) -> anyhow::Result<String> {
        self.reply(params)
    }

    fn post(&self, params: &Params) -> anyhow::Result<String> {
        self.reply(params)
    }
}

// ============================================================================
// SOURCES
// ============================================================================

pub struct FakeEncyclopedia {
    pages: PageSet,
    calls: Rc<Cell<usize>>,
}

impl FakeEncyclopedia {
    pub fn new(pages: PageSet) -> Self {
        FakeEncyclopedia {
            pages,
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn calls(&self) -> Rc<Cell<usize>> {
        self.calls.clone()
    }
}

impl EncyclopediaSource for FakeEncyclopedia {
    fn fetch_pages(&self, _titles: &[String]) -> Result<PageSet> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.pages.clone())
    }
}

#[derive(Default)]
pub struct GraphCalls {
    pub by_ids: Cell<usize>,
    pub by_titles: Cell<usize>,
}

pub struct FakeGraph {
    nodes: Vec<GraphEntity>,
    calls: Rc<GraphCalls>,
}

impl FakeGraph {
    pub fn new(nodes: Vec<GraphEntity>) -> Self {
        FakeGraph {
            nodes,
            calls: Rc::new(GraphCalls::default()),
        }
    }

    pub fn calls(&self) -> Rc<GraphCalls> {
        self.calls.clone()
    }
}

impl KnowledgeGraphSource for FakeGraph {
    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphEntity>> {
        self.calls.by_ids.set(self.calls.by_ids.get() + 1);
        Ok(self
            .nodes
            .iter()
            .filter(|n| ids.iter().any(|id| n.answers(id)))
            .cloned()
            .collect())
    }

    fn fetch_by_titles(&self, titles: &[String]) -> Result<Vec<GraphEntity>> {
        self.calls.by_titles.set(self.calls.by_titles.get() + 1);
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.sitelink.as_ref().is_some_and(|s| titles.contains(s)))
            .cloned()
            .collect())
    }
}

pub struct FakeDescriber {
    source: String,
    known: HashMap<String, Variable>,
    calls: Rc<Cell<usize>>,
}

impl FakeDescriber {
    pub fn new(source: &str, known: Vec<(&str, Variable)>) -> Self {
        FakeDescriber {
            source: source.to_string(),
            known: known.into_iter().map(|(id, v)| (id.to_string(), v)).collect(),
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn calls(&self) -> Rc<Cell<usize>> {
        self.calls.clone()
    }
}

impl Describer for FakeDescriber {
    fn source(&self) -> &str {
        &self.source
    }

    fn get(&self, identity: &str) -> Result<Option<Vec<Variable>>> {
        Ok(self.known.get(identity).map(|v| vec![v.clone()]))
    }

    fn get_many(&self, identities: &[String]) -> Result<Vec<Option<Vec<Variable>>>> {
        self.calls.set(self.calls.get() + 1);
        identities.iter().map(|id| self.get(id)).collect()
    }
}
