// Response Continuation Engine
//
// Wraps one JSON reply of a paginated query API. Top-level keys are split
// into metadata (fixed key set) and content (everything else). Following a
// continuation yields a *new* Response whose content is the deep merge of
// all pages so far and whose metadata is the newest page's, verbatim.
//
// The deep merge is a heuristic: the remote splits one logical record's
// fields across pages unpredictably. Hash ∩ hash recurses, list ∩ list
// concatenates (older items first), anything else takes the newer value.
// A list field partially repeated across pages ends up with duplicates.

use crate::error::{RealityError, Result};
use crate::http::{HttpClient, Params};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reply keys that describe the reply rather than the answer.
pub const METADATA_KEYS: [&str; 6] = ["error", "warnings", "batchcomplete", "continue", "success", "limits"];

/// Guard against a remote that never stops handing out continuations.
pub const MAX_CONTINUATIONS: usize = 500;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One API request: action name + parameters, bound to a client.
#[derive(Clone)]
pub struct Request {
    client: Arc<dyn HttpClient>,
    method: Method,
    params: Params,
}

impl Request {
    /// New GET request for `action`, asking for JSON.
    pub fn new(client: Arc<dyn HttpClient>, action: &str) -> Self {
        let mut params = Params::new();
        params.insert("action".to_string(), action.to_string());
        params.insert("format".to_string(), "json".to_string());
        Request {
            client,
            method: Method::Get,
            params,
        }
    }

    /// Builder: set a parameter
    pub fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Builder: set a `|`-joined list parameter
    pub fn list_param<S: AsRef<str>>(self, key: &str, values: &[S]) -> Self {
        let joined = values.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("|");
        self.param(key, joined)
    }

    /// Builder: send as POST
    pub fn post(mut self) -> Self {
        self.method = Method::Post;
        self
    }

    pub fn action(&self) -> &str {
        self.params.get("action").map(String::as_str).unwrap_or_default()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    fn send(&self, params: &Params) -> Result<String> {
        debug!(action = self.action(), "performing request");
        let body = match self.method {
            Method::Get => self.client.get(params)?,
            Method::Post => self.client.post(params)?,
        };
        Ok(body)
    }

    /// Perform and parse the first page.
    pub fn perform(&self) -> Result<Response> {
        let body = self.send(&self.params)?;
        Response::parse(self.clone(), &body)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("params", &self.params)
            .finish()
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// One logically complete (or partial, if `has_continuation`) reply.
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    metadata: Map<String, Json>,
    content: Map<String, Json>,
}

impl Response {
    /// Parse a raw body. A body carrying `error` never yields a Response.
    pub fn parse(request: Request, raw_body: &str) -> Result<Self> {
        let json: Json = serde_json::from_str(raw_body)?;
        Response::from_json(request, json)
    }

    pub fn from_json(request: Request, json: Json) -> Result<Self> {
        let Json::Object(body) = json else {
            return Err(RealityError::MalformedReply(format!(
                "expected a JSON object for action {}",
                request.action()
            )));
        };

        let (metadata, content): (Map<String, Json>, Map<String, Json>) = body
            .into_iter()
            .partition(|(key, _)| METADATA_KEYS.contains(&key.as_str()));

        if let Some(error) = metadata.get("error") {
            return Err(remote_error(error));
        }
        if let Some(warnings) = metadata.get("warnings") {
            warn!(action = request.action(), %warnings, "remote API warnings");
        }

        Ok(Response {
            request,
            metadata,
            content,
        })
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn metadata(&self) -> &Map<String, Json> {
        &self.metadata
    }

    pub fn content(&self) -> &Map<String, Json> {
        &self.content
    }

    /// Content, unwrapped one level when it is a single key named after the
    /// request's action (`{"query": {...}}` for `action=query`).
    pub fn to_h(&self) -> Json {
        if self.content.len() == 1 {
            if let Some(inner) = self.content.get(self.request.action()) {
                return inner.clone();
            }
        }
        Json::Object(self.content.clone())
    }

    pub fn has_continuation(&self) -> bool {
        self.metadata.contains_key("continue")
    }

    /// Fetch the next page and merge it into this one.
    ///
    /// Calling this on a complete response is a programming error and fails
    /// with `NoContinuation`. A `continue` block that is not a token map is
    /// a malformed reply.
    pub fn continue_query(&self) -> Result<Response> {
        let tokens = self
            .metadata
            .get("continue")
            .ok_or(RealityError::NoContinuation)?
            .as_object()
            .ok_or_else(|| {
                RealityError::MalformedReply(format!(
                    "continuation for action {} is not a token map",
                    self.request.action()
                ))
            })?;

        let mut params = self.request.params.clone();
        for (key, value) in tokens {
            params.insert(key.clone(), param_value(value));
        }

        let body = self.request.send(&params)?;
        let next = Response::parse(self.request.clone(), &body)?;

        Ok(Response {
            request: self.request.clone(),
            metadata: next.metadata,
            content: merge_maps(self.content.clone(), next.content),
        })
    }

    /// Follow continuations sequentially until the answer is complete.
    pub fn fetch_all(self) -> Result<Response> {
        let mut response = self;
        let mut pages = 1;
        while response.has_continuation() {
            if pages > MAX_CONTINUATIONS {
                return Err(RealityError::MalformedReply(format!(
                    "more than {} continuation pages for action {}",
                    MAX_CONTINUATIONS,
                    response.request.action()
                )));
            }
            response = response.continue_query()?;
            pages += 1;
        }
        debug!(action = response.request.action(), pages, "response complete");
        Ok(response)
    }
}

fn remote_error(error: &Json) -> RealityError {
    let field = |name: &str| error.get(name).and_then(Json::as_str).map(str::to_string);
    RealityError::Remote {
        code: field("code").unwrap_or_else(|| "unknown".to_string()),
        info: field("info").unwrap_or_else(|| error.to_string()),
    }
}

/// Continuation tokens go back verbatim; JSON strings lose their quotes.
fn param_value(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// DEEP MERGE
// ============================================================================

/// Merge `newer` into `older`: maps recurse, lists concatenate, otherwise
/// the newer value wins.
pub fn deep_merge(older: Json, newer: Json) -> Json {
    match (older, newer) {
        (Json::Object(old), Json::Object(new)) => Json::Object(merge_maps(old, new)),
        (Json::Array(mut old), Json::Array(new)) => {
            old.extend(new);
            Json::Array(old)
        }
        (_, newer) => newer,
    }
}

fn merge_maps(mut older: Map<String, Json>, newer: Map<String, Json>) -> Map<String, Json> {
    for (key, value) in newer {
        let merged = match older.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        older.insert(key, merged);
    }
    older
}

// ============================================================================
// TESTS
// ============================================================================
