//! Template engine for dynamic response bodies.
//!
//! Bodies are Handlebars templates rendered against the request's merged
//! parameter map, so `{{id}}` expands to the route parameter `id` (or a
//! header, cookie or query parameter of that name).

use chrono::Utc;
use handlebars::{handlebars_helper, Handlebars};
use rand::Rng;
use serde_json::Value;
use std::fmt::Write;

use crate::error::{MockError, Result};
use crate::request::Params;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

// `{{json payload}}`: JSON held in a string is re-emitted compactly,
// anything else is encoded.
handlebars_helper!(compact_json: |value: Json| match value.as_str().map(serde_json::from_str::<Value>) {
    Some(Ok(parsed)) => parsed.to_string(),
    _ => value.to_string(),
});

handlebars_helper!(uuid_v4: |*_args| random_uuid());

// `{{now}}` or `{{now format="%Y-%m-%d"}}`
handlebars_helper!(timestamp: |{format: str = "%Y-%m-%dT%H:%M:%S%.3fZ"}| format_now(format));

// `{{random 1 6}}`, bounds inclusive and in either order
handlebars_helper!(random_between: |a: i64, b: i64| {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    rand::thread_rng().gen_range(low..=high)
});

// `{{default page "1"}}`: the fallback replaces nil and empty strings.
handlebars_helper!(or_default: |value: Json, fallback: Json| match value {
    Value::Null => fallback.clone(),
    Value::String(s) if s.is_empty() => fallback.clone(),
    other => other.clone(),
});

handlebars_helper!(upper_case: |text: str| text.to_uppercase());
handlebars_helper!(lower_case: |text: str| text.to_lowercase());

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(compact_json));
        handlebars.register_helper("uuid", Box::new(uuid_v4));
        handlebars.register_helper("now", Box::new(timestamp));
        handlebars.register_helper("random", Box::new(random_between));
        handlebars.register_helper("default", Box::new(or_default));
        handlebars.register_helper("upper", Box::new(upper_case));
        handlebars.register_helper("lower", Box::new(lower_case));

        // Bodies are JSON, XML or plain text; never HTML-escape.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render `template` with `params` as the top-level context.
    pub fn render(&self, template: &str, params: &Params) -> Result<String> {
        self.handlebars
            .render_template(template, params)
            .map_err(|e| MockError::Synthesis(e.to_string()))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Random version 4 UUID, hyphenated.
fn random_uuid() -> String {
    let mut bits = rand::random::<u128>();
    bits = (bits & !(0xF << 76)) | (0x4 << 76);
    bits = (bits & !(0x3 << 62)) | (0x2 << 62);

    let hex = format!("{:032x}", bits);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}

/// Current UTC time in `format`; empty when the format is invalid.
fn format_now(format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", Utc::now().format(format)).is_err() {
        out.clear();
    }
    out
}
