// 📖 Encyclopedia source (Wikipedia)
//
// One `action=query` per batch of titles: latest revision content, revision
// timestamp and the linked knowledge-graph item (`pageprops.wikibase_item`),
// following redirects. The reply's `normalized` and `redirects` lists become
// the PageSet aliases, so callers match pages by requested name.
//
// Variables come from the page's first `{{Infobox ...}}`: a field table maps
// infobox keys to variable names and coercion targets. A field that fails to
// coerce is logged and skipped; the rest of the page still loads.

use crate::coerce::{coerce, CoerceOptions, CoerceType, Raw, AREA_UNIT};
use crate::config::Config;
use crate::describers::{Describer, EncyclopediaSource, Page, PageSet};
use crate::entity::WIKIPEDIA;
use crate::error::{RealityError, Result};
use crate::geo::parse_coord_template;
use crate::http::{HttpClient, Params};
use crate::response::{Request, Response};
use crate::variable::{Observation, Variable};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

static REF_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<ref[^>/]*/>|<ref[^>]*>.*?</ref>").expect("valid ref pattern")
});

static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));

static BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid break pattern"));

static WIKILINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]*))?\]\]").expect("valid wikilink pattern"));

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[+\-\u{2212}]?\d[\d,.\u{a0}\u{202f}]*").expect("valid number pattern")
});

/// Link namespaces that never name an entity.
const IGNORED_NAMESPACES: [&str; 4] = ["File:", "Image:", "Category:", "Media:"];

// ============================================================================
// FIELD TABLE
// ============================================================================

/// How one infobox key becomes a variable.
#[derive(Debug, Clone)]
pub struct InfoboxField {
    pub key: String,
    pub variable: String,
    pub ty: CoerceType,
    pub opts: CoerceOptions,
}

impl InfoboxField {
    pub fn new(key: &str, variable: &str, ty: CoerceType) -> Self {
        InfoboxField {
            key: key.to_string(),
            variable: variable.to_string(),
            ty,
            opts: CoerceOptions::new(),
        }
    }

    /// Builder: unit for measure targets
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.opts = self.opts.with_unit(unit);
        self
    }

    /// Builder: parse hook
    pub fn with_parse(mut self, hook: impl Fn(Raw) -> Raw + Send + Sync + 'static) -> Self {
        self.opts = self.opts.with_parse(hook);
        self
    }
}

/// Settlement/country infobox fields understood out of the box.
pub fn default_fields() -> Vec<InfoboxField> {
    vec![
        InfoboxField::new("population_total", "population", CoerceType::Integer).with_parse(leading_number),
        InfoboxField::new("area_total_km2", "area", CoerceType::Measure)
            .with_unit(AREA_UNIT)
            .with_parse(leading_number),
        InfoboxField::new("capital", "capital", CoerceType::Entity),
        InfoboxField::new("coordinates", "coordinates", CoerceType::Coord).with_parse(parse_coord_template),
        InfoboxField::new("utc_offset", "utc_offset", CoerceType::TzOffset),
        InfoboxField::new("leader_name", "leader", CoerceType::Entity),
        InfoboxField::new("official_name", "official_name", CoerceType::String),
    ]
}

/// Parse hook: keep the first number in free text (`"2,952,301 (2022)"`).
pub fn leading_number(raw: Raw) -> Raw {
    match &raw {
        Raw::Str(text) => LEADING_NUMBER
            .find(text)
            .map(|m| Raw::Str(m.as_str().trim_end_matches(&[',', '.'][..]).to_string()))
            .unwrap_or(Raw::Null),
        _ => raw,
    }
}

// ============================================================================
// SOURCE
// ============================================================================

pub struct Wikipedia {
    client: Arc<dyn HttpClient>,
    fields: Vec<InfoboxField>,
    chunk_size: usize,
}

impl Wikipedia {
    pub fn new(client: Arc<dyn HttpClient>, config: &Config) -> Self {
        Wikipedia {
            client,
            fields: default_fields(),
            chunk_size: config.max_ids_per_call.max(1),
        }
    }

    /// Builder: replace the infobox field table
    pub fn with_fields(mut self, fields: Vec<InfoboxField>) -> Self {
        self.fields = fields;
        self
    }

    pub fn fields(&self) -> &[InfoboxField] {
        &self.fields
    }

    /// Raw query: `params` must carry `action`; continuations are followed.
    pub fn perform_query(&self, params: Params) -> Result<Response> {
        let action = params.get("action").cloned().unwrap_or_else(|| "query".to_string());
        params
            .into_iter()
            .fold(Request::new(self.client.clone(), &action), |request, (key, value)| {
                request.param(&key, value)
            })
            .perform()?
            .fetch_all()
    }

    fn pages_request(&self, titles: &[String]) -> Request {
        Request::new(self.client.clone(), "query")
            .list_param("titles", titles)
            .param("prop", "revisions|pageprops")
            .param("rvprop", "content|timestamp")
            .param("rvslots", "main")
            .param("ppprop", "wikibase_item")
            .param("redirects", "1")
            .param("formatversion", "1")
    }

    /// Variables from one page's wikitext via the field table.
    pub fn page_variables(&self, wikitext: &str, timestamp: DateTime<Utc>) -> Result<Vec<Variable>> {
        let Some(infobox) = extract_infobox(wikitext) else {
            return Ok(Vec::new());
        };

        let mut variables = Vec::new();
        for field in &self.fields {
            let Some(text) = infobox.get(&field.key) else {
                continue;
            };
            match coerce(raw_value(text), &field.ty, &field.opts) {
                Ok(Some(value)) => variables.push(Variable::single(
                    field.variable.clone(),
                    Observation::new(timestamp, value, WIKIPEDIA),
                )),
                Ok(None) => {}
                Err(e) if e.is_coercion() => {
                    warn!(field = field.key.as_str(), error = %e, "skipping infobox field");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(variables)
    }

    fn absorb_query(&self, query: &Json, set: &mut PageSet) -> Result<()> {
        for list in ["normalized", "redirects"] {
            for alias in query[list].as_array().into_iter().flatten() {
                if let (Some(from), Some(to)) = (alias["from"].as_str(), alias["to"].as_str()) {
                    set.add_alias(from, to);
                }
            }
        }

        let Some(pages) = query["pages"].as_object() else {
            return Ok(());
        };
        for (key, page) in pages {
            let Some(title) = page["title"].as_str() else {
                warn!(key = key.as_str(), "page without title");
                continue;
            };
            if page.get("missing").is_some() || page.get("invalid").is_some() {
                debug!(title, "page missing");
                continue;
            }

            let revision = &page["revisions"][0];
            let timestamp = revision["timestamp"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let wikitext = revision["slots"]["main"]["*"]
                .as_str()
                .or_else(|| revision["*"].as_str())
                .unwrap_or_default();

            set.push(Page {
                title: title.to_string(),
                wikidata_id: page["pageprops"]["wikibase_item"].as_str().map(str::to_string),
                variables: self.page_variables(wikitext, timestamp)?,
            });
        }
        Ok(())
    }
}

impl EncyclopediaSource for Wikipedia {
    fn fetch_pages(&self, titles: &[String]) -> Result<PageSet> {
        let mut set = PageSet::default();
        for chunk in titles.chunks(self.chunk_size) {
            let response = self.pages_request(chunk).perform()?.fetch_all()?;
            let query = response.to_h();
            if !query.is_object() {
                return Err(RealityError::MalformedReply("query reply without content".to_string()));
            }
            self.absorb_query(&query, &mut set)?;
        }
        debug!(requested = titles.len(), found = set.len(), "pages fetched");
        Ok(set)
    }
}

impl Describer for Wikipedia {
    fn source(&self) -> &str {
        WIKIPEDIA
    }

    fn get(&self, identity: &str) -> Result<Option<Vec<Variable>>> {
        let mut found = self.get_many(&[identity.to_string()])?;
        Ok(found.pop().flatten())
    }

    fn get_many(&self, identities: &[String]) -> Result<Vec<Option<Vec<Variable>>>> {
        let set = self.fetch_pages(identities)?;
        Ok(identities
            .iter()
            .map(|title| set.find(title).map(|page| page.variables.clone()))
            .collect())
    }
}

impl fmt::Debug for Wikipedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wikipedia")
            .field("fields", &self.fields.iter().map(|f| f.key.as_str()).collect::<Vec<_>>())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

// ============================================================================
// INFOBOX PARSING
// ============================================================================

/// Key/value pairs of the first `{{Infobox ...}}` template in `wikitext`.
///
/// Splits on `|` only at the template's own nesting level, so pipes inside
/// nested templates and links stay part of the value.
pub fn extract_infobox(wikitext: &str) -> Option<BTreeMap<String, String>> {
    let start = wikitext.to_ascii_lowercase().find("{{infobox")?;
    let body = &wikitext[start + 2..];

    let mut templates = 1usize;
    let mut links = 0usize;
    let mut parts: Vec<&str> = Vec::new();
    let mut part_start = 0;
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut end = None;

    while i < bytes.len() {
        match &bytes[i..(i + 2).min(bytes.len())] {
            b"{{" => {
                templates += 1;
                i += 2;
                continue;
            }
            b"}}" => {
                templates -= 1;
                if templates == 0 {
                    end = Some(i);
                    break;
                }
                i += 2;
                continue;
            }
            b"[[" => {
                links += 1;
                i += 2;
                continue;
            }
            b"]]" => {
                links = links.saturating_sub(1);
                i += 2;
                continue;
            }
            _ => {}
        }
        if bytes[i] == b'|' && templates == 1 && links == 0 {
            parts.push(&body[part_start..i]);
            part_start = i + 1;
        }
        i += 1;
    }

    let end = end?;
    parts.push(&body[part_start..end]);

    // First part is the template name
    let fields = parts
        .into_iter()
        .skip(1)
        .filter_map(|part| {
            let (key, value) = part.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect();
    Some(fields)
}

/// Raw value of one infobox field.
///
/// Leading templates are kept as text for parse hooks; otherwise wikilinks
/// become link values (a list when there are several) and anything else is
/// cleaned text.
pub fn raw_value(text: &str) -> Raw {
    let cleaned = strip_markup(text);
    if cleaned.is_empty() {
        return Raw::Null;
    }
    if cleaned.starts_with("{{") {
        return Raw::Str(cleaned);
    }

    let mut links: Vec<Raw> = WIKILINK
        .captures_iter(&cleaned)
        .filter(|caps| !IGNORED_NAMESPACES.iter().any(|ns| caps[1].trim_start().starts_with(ns)))
        .map(|caps| {
            let target = caps[1].trim();
            let label = caps.get(2).map(|m| m.as_str().trim()).filter(|l| !l.is_empty());
            Raw::wikilink(target, label)
        })
        .collect();

    match links.len() {
        0 => Raw::Str(cleaned),
        1 => links.remove(0),
        _ => Raw::List(links),
    }
}

fn strip_markup(text: &str) -> String {
    let text = COMMENT.replace_all(text, "");
    let text = REF_TAG.replace_all(&text, "");
    let text = BREAK.replace_all(&text, " ");
    text.replace("'''", "").replace("''", "").trim().to_string()
}

// ============================================================================
// TESTS
// ============================================================================
