use serde_json::Value;

use crate::error::SyncError;

/// API prefix the remote puts in front of `_links.next`.
pub const LINK_PREFIX: &str = "/api/v2/";

/// Page size substituted when the remote hands out a `limit=0` next link.
pub const DEFAULT_PAGE_LIMIT: u64 = 250;

/// A paginated collection: where to start and which envelope key holds items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// First-page path, e.g. `get_cases/1&suite_id=2`.
    pub path: String,
    /// Envelope key holding the item array, e.g. `cases`.
    pub items_key: String,
}

impl Collection {
    pub fn new(path: impl Into<String>, items_key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            items_key: items_key.into(),
        }
    }
}

/// One decoded response of a paginated endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    /// Legacy endpoint returning the whole collection as a bare list.
    Bare(Vec<Value>),
    Envelope {
        items: Vec<Value>,
        /// Relative path of the next page, already normalized.
        next: Option<String>,
        /// `limit` reported by the envelope, if any.
        limit: Option<u64>,
    },
}

impl Page {
    /// Check the basic shape of a page body and split it into parts.
    pub fn parse(path: &str, items_key: &str, body: Value) -> Result<Self, SyncError> {
        let invalid = |reason: String| SyncError::InvalidPage {
            path: path.to_string(),
            reason,
        };

        match body {
            Value::Array(items) => Ok(Self::Bare(items)),
            Value::Object(mut map) => {
                let items = match map.remove(items_key) {
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(invalid(format!(
                            "'{items_key}' is {} instead of an array",
                            json_type(&other)
                        )));
                    }
                    None => return Err(invalid(format!("missing '{items_key}'"))),
                };
                let next = map
                    .get("_links")
                    .and_then(|links| links.get("next"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(normalize_link);
                let limit = map.get("limit").and_then(Value::as_u64);
                Ok(Self::Envelope { items, next, limit })
            }
            other => Err(invalid(format!("expected a JSON object, got {}", json_type(&other)))),
        }
    }

    pub fn items(&self) -> &[Value] {
        match self {
            Self::Bare(items) | Self::Envelope { items, .. } => items,
        }
    }

    pub fn next(&self) -> Option<&str> {
        match self {
            Self::Bare(_) => None,
            Self::Envelope { next, .. } => next.as_deref(),
        }
    }
}

/// Strip the API prefix from an absolute `_links.next` value and replace a
/// `limit=0` parameter, which some servers emit, with the default page size.
pub fn normalize_link(link: &str) -> String {
    link.strip_prefix(LINK_PREFIX)
        .unwrap_or(link)
        .split('&')
        .map(|part| {
            if part == "limit=0" {
                format!("limit={DEFAULT_PAGE_LIMIT}")
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Read a numeric `&name=value` parameter from a link.
pub fn link_param(link: &str, name: &str) -> Option<u64> {
    link.split('&')
        .filter_map(|part| part.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| v.parse().ok())
}

/// Return `link` with its `offset` parameter set to `offset` (appended if absent).
pub fn with_offset(link: &str, offset: u64) -> String {
    let mut replaced = false;
    let parts: Vec<String> = link
        .split('&')
        .map(|part| match part.split_once('=') {
            Some(("offset", _)) => {
                replaced = true;
                format!("offset={offset}")
            }
            _ => part.to_string(),
        })
        .collect();
    let joined = parts.join("&");
    if replaced {
        joined
    } else {
        format!("{joined}&offset={offset}")
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
