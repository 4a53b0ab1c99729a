//! Response synthesis.
//!
//! Turns the selected [`Response`] into the artifact handed back to the
//! caller: rendered body, assembled headers, status and the delay the
//! caller should wait before replying.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{MockError, Result};
use crate::index::Response;
use crate::request::NormalizedRequest;
use crate::template::TemplateEngine;

/// A mock response ready to be returned.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// How long the caller should wait before replying. The engine never
    /// sleeps itself.
    pub delay: Duration,
}

impl SynthesizedResponse {
    /// Convert into an `http::Response`.
    pub fn into_http(self) -> Result<http::Response<Bytes>> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| MockError::Synthesis(format!("status {}: {}", self.status, e)))?;

        let mut response = http::Response::new(self.body);
        *response.status_mut() = status;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| MockError::Synthesis(format!("header name `{}`: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| MockError::Synthesis(format!("header `{}`: {}", name, e)))?;
            response.headers_mut().append(name, value);
        }
        Ok(response)
    }
}

/// Build the response artifact for `request`.
pub fn synthesize(
    response: &Response,
    request: &NormalizedRequest,
    engine: &TemplateEngine,
) -> Result<SynthesizedResponse> {
    let body = if response.enable_template {
        engine.render(&response.body, &request.collect_all_params())?
    } else {
        response.body.clone()
    };
    let body = Bytes::from(body);

    let mut headers = response.headers.clone();
    let declared = headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("Content-Type"));
    if !declared {
        headers.insert(
            "Content-Type".to_string(),
            sniff_content_type(&body).to_string(),
        );
    }

    Ok(SynthesizedResponse {
        status: response.status,
        headers,
        body,
        delay: response.delay,
    })
}

const SNIFF_LEN: usize = 512;

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", "text/plain; charset=utf-8"),
    (b"\x89PNG\r\n\x1A\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
];

/// Guess a Content-Type from the first bytes of `body`.
///
/// Always returns a valid MIME type, falling back to
/// `application/octet-stream`.
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    let data = &body[..body.len().min(SNIFF_LEN)];
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    let trimmed = &data[start..];

    for tag in HTML_TAGS {
        if is_html_tag(trimmed, tag) {
            return "text/html; charset=utf-8";
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }
    for &(signature, content_type) in SIGNATURES {
        if data.starts_with(signature) {
            return content_type;
        }
    }

    if data.iter().any(|b| is_binary_byte(*b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

/// Case-insensitive tag prefix followed by a space or `>`.
fn is_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() <= tag.len() || !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
