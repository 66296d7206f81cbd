// Knowledge-graph source (Wikidata)
//
// `wbgetentities` by item id or by linked encyclopedia title. Every statement
// becomes an Observation of the variable named after its property's label:
//
//   P1082 "population"  → population
//   P2046 "area"        → area
//   P625 "coordinate location" → coordinate_location
//
// Observation time is the "point in time" qualifier (P585) when present,
// otherwise the item's last modification, otherwise now.

use crate::coerce::{coerce, parse_number, CoerceOptions, CoerceType, Raw};
use crate::config::Config;
use crate::describers::{Describer, GraphEntity, KnowledgeGraphSource};
use crate::entity::{Link, WIKIDATA};
use crate::error::{RealityError, Result};
use crate::geo::Coord;
use crate::http::{HttpClient, Params};
use crate::labels::{entity_id, unit_id, LabelResolver, LabelSource};
use crate::response::{Request, Response};
use crate::value::Value;
use crate::variable::{Observation, Variable};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{Map, Value as Json};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// "point in time" qualifier
pub const POINT_IN_TIME: &str = "P585";

const ENTITY_PROPS: &str = "info|labels|claims|sitelinks";

// ============================================================================
// LABEL SOURCE
// ============================================================================

/// Labels of items, properties and units via `wbgetentities&props=labels`.
#[derive(Clone)]
pub struct WikidataLabels {
    client: Arc<dyn HttpClient>,
    language: String,
}

impl WikidataLabels {
    pub fn new(client: Arc<dyn HttpClient>, language: &str) -> Self {
        WikidataLabels {
            client,
            language: language.to_string(),
        }
    }
}

impl LabelSource for WikidataLabels {
    fn fetch_labels(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let response = Request::new(self.client.clone(), "wbgetentities")
            .list_param("ids", ids)
            .param("props", "labels")
            .param("languages", self.language.as_str())
            .perform()?
            .fetch_all()?;

        let mut labels = HashMap::new();
        for (id, item) in entities_of(&response)? {
            if let Some(label) = item["labels"][self.language.as_str()]["value"].as_str() {
                labels.insert(id.clone(), label.to_string());
            }
        }
        Ok(labels)
    }
}

// ============================================================================
// SOURCE
// ============================================================================

pub struct Wikidata {
    client: Arc<dyn HttpClient>,
    labels: RefCell<LabelResolver>,
    language: String,
    site: String,
    chunk_size: usize,
}

impl Wikidata {
    pub fn new(client: Arc<dyn HttpClient>, labels: LabelResolver, config: &Config) -> Self {
        Wikidata {
            client,
            labels: RefCell::new(labels),
            language: config.language.clone(),
            site: config.site(),
            chunk_size: config.max_ids_per_call.max(1),
        }
    }

    /// Raw query: `params` must carry `action`; continuations are followed.
    pub fn perform_query(&self, params: Params) -> Result<Response> {
        let action = params.get("action").cloned().unwrap_or_else(|| "wbgetentities".to_string());
        params
            .into_iter()
            .fold(Request::new(self.client.clone(), &action), |request, (key, value)| {
                request.param(&key, value)
            })
            .perform()?
            .fetch_all()
    }

    fn entities_request(&self) -> Request {
        Request::new(self.client.clone(), "wbgetentities")
            .param("props", ENTITY_PROPS)
            .param("languages", self.language.as_str())
    }

    fn fetch(&self, requests: Vec<Request>) -> Result<Vec<GraphEntity>> {
        let mut items: Vec<Map<String, Json>> = Vec::new();
        for request in requests {
            let response = request.perform()?.fetch_all()?;
            for (key, item) in entities_of(&response)? {
                match item.as_object() {
                    Some(_) if item.get("missing").is_some() => debug!(key = key.as_str(), "item missing"),
                    Some(object) => items.push(object.clone()),
                    None => warn!(key = key.as_str(), "ignoring non-object entity"),
                }
            }
        }

        // One label round per facet for the whole batch
        self.labels
            .borrow_mut()
            .update_from(items.iter().filter_map(|item| item.get("claims").and_then(Json::as_object)))?;

        let labels = self.labels.borrow();
        let nodes = items.iter().map(|item| self.graph_entity(item, &labels)).collect();
        nodes
    }

    fn graph_entity(&self, item: &Map<String, Json>, labels: &LabelResolver) -> Result<GraphEntity> {
        let id = item
            .get("id")
            .and_then(Json::as_str)
            .ok_or_else(|| RealityError::MalformedReply("entity without id".to_string()))?
            .to_string();
        let modified = item
            .get("modified")
            .and_then(Json::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let claims = item.get("claims").and_then(Json::as_object);
        let variables = match claims {
            Some(claims) => decode_claims(claims, labels, modified.unwrap_or_else(Utc::now))?,
            None => Vec::new(),
        };

        Ok(GraphEntity {
            label: item
                .get("labels")
                .and_then(|l| l[self.language.as_str()]["value"].as_str())
                .map(str::to_string),
            sitelink: item
                .get("sitelinks")
                .and_then(|s| s[self.site.as_str()]["title"].as_str())
                .map(str::to_string),
            redirected_from: item
                .get("redirects")
                .and_then(|r| r["from"].as_str())
                .map(str::to_string),
            id,
            variables,
        })
    }
}

impl KnowledgeGraphSource for Wikidata {
    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<GraphEntity>> {
        let requests = ids
            .chunks(self.chunk_size)
            .map(|chunk| self.entities_request().list_param("ids", chunk))
            .collect();
        self.fetch(requests)
    }

    fn fetch_by_titles(&self, titles: &[String]) -> Result<Vec<GraphEntity>> {
        let requests = titles
            .chunks(self.chunk_size)
            .map(|chunk| {
                self.entities_request()
                    .param("sites", self.site.as_str())
                    .list_param("titles", chunk)
            })
            .collect();
        self.fetch(requests)
    }
}

impl Describer for Wikidata {
    fn source(&self) -> &str {
        WIKIDATA
    }

    fn get(&self, identity: &str) -> Result<Option<Vec<Variable>>> {
        let mut found = self.get_many(&[identity.to_string()])?;
        Ok(found.pop().flatten())
    }

    fn get_many(&self, identities: &[String]) -> Result<Vec<Option<Vec<Variable>>>> {
        let nodes = self.fetch_by_ids(identities)?;
        Ok(identities
            .iter()
            .map(|id| nodes.iter().find(|n| n.answers(id)).map(|n| n.variables.clone()))
            .collect())
    }
}

fn entities_of(response: &Response) -> Result<&Map<String, Json>> {
    response
        .content()
        .get("entities")
        .and_then(Json::as_object)
        .ok_or_else(|| RealityError::MalformedReply("wbgetentities reply without entities".to_string()))
}

// ============================================================================
// CLAIM DECODING
// ============================================================================

/// Decode an item's `claims` map into variables, one per property.
pub fn decode_claims(
    claims: &Map<String, Json>,
    labels: &LabelResolver,
    fallback_time: DateTime<Utc>,
) -> Result<Vec<Variable>> {
    let mut grouped: BTreeMap<String, Vec<Observation>> = BTreeMap::new();

    for (property, statements) in claims {
        let name = variable_name(labels.property_label(property).unwrap_or(property.as_str()));
        for statement in statements.as_array().into_iter().flatten() {
            if statement["rank"].as_str() == Some("deprecated") {
                continue;
            }
            let value = match decode_snak(&statement["mainsnak"], labels) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e @ RealityError::UnknownSnakType(_)) => return Err(e),
                Err(e) if e.is_coercion() || matches!(e, RealityError::InvalidCoord(_)) => {
                    warn!(property = property.as_str(), error = %e, "skipping undecodable statement");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let timestamp = point_in_time(statement).unwrap_or(fallback_time);
            grouped
                .entry(name.clone())
                .or_default()
                .push(Observation::new(timestamp, value, WIKIDATA));
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(name, observations)| Variable::new(name, observations))
        .collect())
}

/// Typed value of one snak; `None` for `somevalue`/`novalue` snaks.
pub fn decode_snak(snak: &Json, labels: &LabelResolver) -> Result<Option<Value>> {
    if snak["snaktype"].as_str().unwrap_or("value") != "value" {
        return Ok(None);
    }
    let datavalue = &snak["datavalue"];
    let value = &datavalue["value"];
    let plain = CoerceOptions::new();

    match datavalue["type"].as_str().unwrap_or_default() {
        "string" => coerce(json_str(value), &CoerceType::String, &plain),
        "monolingualtext" => coerce(json_str(&value["text"]), &CoerceType::String, &plain),
        "wikibase-entityid" => {
            let Some(id) = entity_id(value) else {
                return Err(RealityError::uncoercible(value, CoerceType::Entity));
            };
            let mut link = Link::new(WIKIDATA, id.as_str());
            if let Some(label) = labels.entity_label(&id) {
                link = link.with_label(label);
            }
            coerce(Raw::Link(link), &CoerceType::Entity, &plain)
        }
        "quantity" => {
            let amount = parse_number(&json_str(&value["amount"]))?;
            match value["unit"].as_str().and_then(unit_id) {
                Some(unit) => {
                    let unit = labels.unit_label(unit).unwrap_or(unit);
                    coerce(Raw::Number(amount), &CoerceType::Measure, &plain.with_unit(unit))
                }
                None if amount.fract().is_zero() => coerce(Raw::Number(amount), &CoerceType::Integer, &plain),
                None => coerce(Raw::Number(amount), &CoerceType::Number, &plain),
            }
        }
        "globecoordinate" => {
            let lat = parse_number(&json_str(&value["latitude"]))?;
            let lng = parse_number(&json_str(&value["longitude"]))?;
            coerce(Raw::Coord(Coord::new(lat, lng)?), &CoerceType::Coord, &plain)
        }
        "time" => {
            let date = value["time"]
                .as_str()
                .and_then(parse_time)
                .ok_or_else(|| RealityError::uncoercible(value, CoerceType::Date))?;
            coerce(Raw::Date(date), &CoerceType::Date, &plain)
        }
        other => Err(RealityError::UnknownSnakType(other.to_string())),
    }
}

fn json_str(value: &Json) -> Raw {
    match value {
        Json::String(s) => Raw::Str(s.clone()),
        Json::Number(n) => Raw::Str(n.to_string()),
        Json::Null => Raw::Null,
        other => Raw::Str(other.to_string()),
    }
}

/// Timestamp of the statement's "point in time" qualifier.
fn point_in_time(statement: &Json) -> Option<DateTime<Utc>> {
    let snak = statement["qualifiers"][POINT_IN_TIME].as_array()?.first()?;
    let date = parse_time(snak["datavalue"]["value"]["time"].as_str()?)?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

/// Date part of a knowledge-graph time string such as
/// `+2016-01-01T00:00:00Z`. Year/month precision uses `00` for the unknown
/// parts; those default to the first month/day.
pub fn parse_time(time: &str) -> Option<NaiveDate> {
    let (sign, rest) = match time.as_bytes().first()? {
        b'-' => (-1, &time[1..]),
        b'+' => (1, &time[1..]),
        _ => (1, time),
    };
    let date = rest.split('T').next()?;
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    NaiveDate::from_ymd_opt(sign * year, month.max(1), day.max(1))
}

/// `"coordinate location"` → `coordinate_location`.
pub fn variable_name(label: &str) -> String {
    let mut name = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_alphanumeric() {
            name.extend(c.to_lowercase());
        } else if !name.is_empty() && !name.ends_with('_') {
            name.push('_');
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    name
}

// ============================================================================
// TESTS
// ============================================================================
