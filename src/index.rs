//! Compiled definitions and the tiered definition index.

use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;

use crate::config::{DefinitionSpec, ResponseSpec};
use crate::error::{MockError, Result};
use crate::path::{compile_path, CompileOptions, PathPattern};
use crate::rule::Rule;

/// Match priority of a definition, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    /// No parameters, no wildcard
    Exact,
    /// Named parameters, no wildcard
    Parameterized,
    /// Trailing wildcard, with or without named parameters
    Wildcard,
}

impl Tier {
    /// Tiers in resolution order.
    pub const ALL: [Tier; 3] = [Tier::Exact, Tier::Parameterized, Tier::Wildcard];

    pub fn of(pattern: &PathPattern) -> Self {
        if pattern.has_wildcard() {
            Tier::Wildcard
        } else if pattern.has_params() {
            Tier::Parameterized
        } else {
            Tier::Exact
        }
    }
}

/// A candidate response of a loaded definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub headers: BTreeMap<String, String>,
    pub rules: Vec<Rule>,
    pub delay: Duration,
    pub status: u16,
    pub enable_template: bool,
    pub body: String,
}

impl Response {
    /// A response without rules is the fallback of its definition.
    pub fn is_default(&self) -> bool {
        self.rules.is_empty()
    }
}

impl From<ResponseSpec> for Response {
    fn from(spec: ResponseSpec) -> Self {
        Self {
            headers: spec.response_headers,
            rules: spec.rules.into_iter().map(Rule::new).collect(),
            delay: Duration::from_millis(spec.delay),
            status: spec.status_code,
            enable_template: spec.enable_template,
            body: spec.response_body,
        }
    }
}

/// A loaded, immutable mock definition.
#[derive(Debug, Clone)]
pub struct Definition {
    host: String,
    method: Method,
    desc: String,
    pattern: PathPattern,
    tier: Tier,
    responses: Vec<Response>,
}

impl Definition {
    /// Compile a definition record.
    pub fn compile(spec: DefinitionSpec, options: CompileOptions) -> Result<Self> {
        let method = Method::from_bytes(spec.method.trim().to_uppercase().as_bytes())
            .map_err(|_| MockError::InvalidDefinition {
                index: 0,
                reason: format!("invalid method `{}`", spec.method),
            })?;
        let pattern = compile_path(&spec.path, options)?;
        let tier = Tier::of(&pattern);

        let definition = Self {
            host: normalize_host(&spec.host),
            method,
            desc: spec.desc,
            pattern,
            tier,
            responses: spec.responses.into_iter().map(Response::from).collect(),
        };

        for rule in definition.responses.iter().flat_map(|r| &r.rules) {
            if let Err(e) = rule.program() {
                warn!(
                    definition = %definition.label(),
                    rule = %rule,
                    error = %e,
                    "Rule does not parse and will never match"
                );
            }
        }

        Ok(definition)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.pattern.template()
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn params(&self) -> &[String] {
        self.pattern.params()
    }

    pub fn has_params(&self) -> bool {
        self.pattern.has_params()
    }

    pub fn has_wildcard(&self) -> bool {
        self.pattern.has_wildcard()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    /// Short label used in logs and errors.
    pub fn label(&self) -> String {
        format!("{} {}{}", self.method, self.host, self.pattern.template())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    host: String,
    method: Method,
}

/// Definitions bucketed by tier and `(host, method)`.
///
/// Built once from a complete set of records; read-only afterwards.
#[derive(Debug, Default)]
pub struct DefinitionIndex {
    definitions: Vec<Definition>,
    buckets: HashMap<(Tier, BucketKey), Vec<usize>>,
}

impl DefinitionIndex {
    /// Validate and compile every record, then bucket it. Fails without side
    /// effects if any record is invalid.
    pub fn build(specs: Vec<DefinitionSpec>, options: CompileOptions) -> Result<Self> {
        let mut index = Self::default();

        for (i, spec) in specs.into_iter().enumerate() {
            spec.validate(options.is_case_sensitive())
                .map_err(|e| MockError::InvalidDefinition {
                    index: i,
                    reason: e.to_string(),
                })?;

            let definition = Definition::compile(spec, options).map_err(|e| match e {
                MockError::InvalidDefinition { reason, .. } => {
                    MockError::InvalidDefinition { index: i, reason }
                }
                MockError::InvalidPattern { template, reason } => MockError::InvalidDefinition {
                    index: i,
                    reason: format!("invalid path `{}`: {}", template, reason),
                },
                other => other,
            })?;

            let key = BucketKey {
                host: definition.host.clone(),
                method: definition.method.clone(),
            };
            index
                .buckets
                .entry((definition.tier, key))
                .or_default()
                .push(index.definitions.len());
            index.definitions.push(definition);
        }

        Ok(index)
    }

    /// Definitions of `tier` for `host` and `method`, in declaration order.
    pub fn tier<'a>(
        &'a self,
        tier: Tier,
        host: &str,
        method: &Method,
    ) -> impl Iterator<Item = &'a Definition> + 'a {
        let key = BucketKey {
            host: normalize_host(host),
            method: method.clone(),
        };
        self.buckets
            .get(&(tier, key))
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&id| &self.definitions[id])
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}
