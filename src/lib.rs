//! HTTP Mock Resolver
//!
//! A mock resolution engine for outbound HTTP requests. Given a set of
//! mock definitions, it decides whether a request should be answered with
//! a synthesized response or forwarded to the real upstream.
//!
//! # Features
//!
//! - **Tiered Matching**: Exact paths beat `:param` paths, which beat
//!   trailing `*wildcard` paths, regardless of load order
//! - **Rule-Based Responses**: Pick a response with boolean expressions
//!   over the request body, headers, cookies, query and route parameters
//! - **Body Decoding**: JSON, XML and form-encoded request bodies
//! - **Dynamic Templates**: Use Handlebars templates for response bodies
//! - **Latency Simulation**: Per-response delays, applied by the client
//! - **Pluggable Sources**: Load definitions from files or memory
//!
//! # Example Definition
//!
//! ```yaml
//! host: marketplace.com
//! path: /users/:id
//! method: POST
//! desc: Known and unknown users
//! responses:
//!   - rules:
//!       - body.name == "William"
//!     status_code: 201
//!     response_headers:
//!       Content-Type: application/json
//!     response_body: '{"id": "{{id}}", "vip": true}'
//!     enable_template: true
//!     delay: 100
//!   - response_body: '{"vip": false}'
//! ```

pub mod body;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod expr;
pub mod index;
pub mod matcher;
pub mod path;
pub mod request;
pub mod resolver;
pub mod rule;
pub mod selector;
pub mod source;
pub mod synth;
pub mod template;

pub use body::ReplayReader;
pub use client::{MockClient, MockPolicy, Outcome, Upstream};
pub use config::{DefinitionSpec, MockHttpConfig, ResponseSpec, Settings};
pub use error::MockError;
pub use resolver::Resolver;
pub use rule::{ExprEvaluator, Rule, RuleContext, RuleEvaluator};
pub use source::{DefinitionSource, FileSource, InMemorySource};
pub use synth::SynthesizedResponse;
