//! Request normalization.
//!
//! Extracts the structured view of an inbound request that matching, rule
//! evaluation and templating work on.

use cookie::Cookie;
use http::header::{COOKIE, HOST};
use http::{HeaderMap, Method, Request};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::body::ReplayReader;
use crate::decode::BodyFormat;
use crate::error::{MockError, Result};
use crate::path::{clean_path, RouteParams};

/// Flat string parameters (headers, cookies, query, route).
pub type Params = HashMap<String, String>;

/// Methods whose requests must carry a supported Content-Type.
const MUTATING_METHODS: [Method; 4] = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE];

/// Structured view of one inbound request.
#[derive(Debug, Clone, Default)]
pub struct NormalizedRequest {
    /// Request authority (`host` or `host:port`)
    pub host: String,
    pub method: Method,
    /// Canonical request path
    pub endpoint: String,
    /// Headers by canonical name, last value wins
    pub headers: Params,
    pub cookies: Params,
    /// Query parameters, last value wins
    pub query_params: Params,
    /// Filled in once a definition matched
    pub route_params: RouteParams,
    /// Decoded body; empty when the body is empty
    pub body: Map<String, Value>,
    /// Body text as received
    pub raw_body: String,
}

impl NormalizedRequest {
    /// Normalize `request`, reading its body through the replay decorator.
    ///
    /// A non-empty body is decoded according to its Content-Type; a missing
    /// or unsupported Content-Type fails instead of skipping the body.
    pub fn from_request(request: &mut Request<ReplayReader>) -> Result<Self> {
        let headers = extract_headers(request.headers());
        let cookies = extract_cookies(request.headers());
        let query_params = extract_query(request.uri().query());
        let host = request_host(request);
        let endpoint = clean_path(request.uri().path());

        let raw = request.body_mut().read_all()?;
        let raw_body = String::from_utf8_lossy(&raw).into_owned();

        let body = if raw.is_empty() {
            Map::new()
        } else {
            let format = body_format(&headers)?;
            debug!(format = format.name(), bytes = raw.len(), "Decoding request body");
            format.decode(&raw_body)?
        };

        Ok(Self {
            host,
            method: request.method().clone(),
            endpoint,
            headers,
            cookies,
            query_params,
            route_params: RouteParams::new(),
            body,
            raw_body,
        })
    }

    /// Host forms to look up, most specific first.
    pub fn host_candidates(&self) -> Vec<&str> {
        let mut hosts = vec![self.host.as_str()];
        if let Some((bare, port)) = self.host.rsplit_once(':') {
            if !bare.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                hosts.push(bare);
            }
        }
        hosts
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type").map(String::as_str)
    }

    /// Mutating methods must declare a supported Content-Type, even when
    /// the body is empty.
    pub fn validate_content_type(&self) -> Result<()> {
        if !MUTATING_METHODS.contains(&self.method) {
            return Ok(());
        }
        body_format(&self.headers).map(|_| ())
    }

    /// Every flat parameter in one map. On key collision route parameters
    /// win over headers, headers over cookies, cookies over query.
    pub fn collect_all_params(&self) -> Params {
        let mut merged = Params::new();
        for source in [
            &self.query_params,
            &self.cookies,
            &self.headers,
            &self.route_params,
        ] {
            for (key, value) in source {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

fn body_format(headers: &Params) -> Result<BodyFormat> {
    let content_type = headers
        .get("Content-Type")
        .ok_or_else(|| MockError::ContentType("request has no Content-Type header".to_string()))?;
    BodyFormat::classify(content_type).ok_or_else(|| {
        MockError::ContentType(format!("unsupported content type `{}`", content_type))
    })
}

fn request_host<B>(request: &Request<B>) -> String {
    if let Some(authority) = request.uri().authority() {
        return match authority.port_u16() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_string(),
        };
    }
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// `content-type` -> `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn extract_headers(headers: &HeaderMap) -> Params {
    let mut params = Params::new();
    for name in headers.keys() {
        // Always take the last value.
        if let Some(value) = headers.get_all(name).iter().last() {
            params.insert(
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
    }
    params
}

fn extract_cookies(headers: &HeaderMap) -> Params {
    let mut cookies = Params::new();
    for value in headers.get_all(COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(value).flatten() {
            cookies.insert(cookie.name().to_string(), cookie.value().to_string());
        }
    }
    cookies
}

fn extract_query(query: Option<&str>) -> Params {
    url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
