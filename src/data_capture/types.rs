//! Engine-side flow model.
//!
//! A `Flow` is what an interception engine hands to its hooks: raw header
//! lists (repeats allowed, wire order), raw body bytes, engine-native cookie
//! objects and wall-clock timestamps. The capture adapter normalizes it into
//! a storage `Exchange`.

use std::fmt;
use std::time::SystemTime;

/// A `Set-Cookie` value with its attributes, e.g. `sid=1; Path=/; HttpOnly`
/// parses to value `1` with attributes `[("Path", Some("/")), ("HttpOnly", None)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCookie {
    pub value: String,
    pub attributes: Vec<(String, Option<String>)>,
}

impl FlowCookie {
    /// Parses one `Set-Cookie` header value into its name and cookie.
    pub fn parse_set_cookie(header: &str) -> Option<(String, FlowCookie)> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let attributes = parts
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (p.to_string(), None),
            })
            .collect();
        Some((
            name.to_string(),
            FlowCookie {
                value: value.trim().to_string(),
                attributes,
            },
        ))
    }
}

impl fmt::Display for FlowCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        for (key, value) in &self.attributes {
            match value {
                Some(v) => write!(f, "; {}={}", key, v)?,
                None => write!(f, "; {}", key)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub method: String,
    /// Absolute URL, e.g. `http://a.com:8000/x?y=1`
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timestamp_start: SystemTime,
}

impl FlowRequest {
    /// Name/value pairs from every `Cookie` header, in order.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .flat_map(|(_, v)| v.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    None
                } else {
                    Some((name.to_string(), value.trim().to_string()))
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FlowResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timestamp_end: SystemTime,
}

impl FlowResponse {
    /// Cookies set by every `Set-Cookie` header, in order.
    pub fn cookies(&self) -> Vec<(String, FlowCookie)> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, v)| FlowCookie::parse_set_cookie(v))
            .collect()
    }
}

/// One intercepted exchange as seen by the engine.
#[derive(Debug, Clone)]
pub struct Flow {
    pub request: FlowRequest,
    pub response: Option<FlowResponse>,
    /// Set when the exchange failed before a response was received
    pub error: Option<String>,
}

impl Flow {
    pub fn new(request: FlowRequest) -> Self {
        Self {
            request,
            response: None,
            error: None,
        }
    }
}
