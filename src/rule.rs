//! Rule evaluation.
//!
//! A response's rules are boolean expressions over the normalized request.
//! Evaluation goes through the [`RuleEvaluator`] trait so embedders can plug
//! in another expression engine; [`ExprEvaluator`] is the built-in one.

use serde_json::{Map, Value};
use std::fmt::{self, Debug};
use thiserror::Error;
use tracing::debug;

use crate::expr::{self, Expr, ExprError};
use crate::request::{NormalizedRequest, Params};

/// Errors raised while evaluating a single rule.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("rule `{0}` did not evaluate to a bool")]
    NotBoolean(String),
}

/// A rule expression, parsed once when its definition is loaded.
///
/// A rule that fails to parse is kept: it never holds, so its response is
/// unreachable, but the rest of the definition still loads.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    source: String,
    program: Result<Expr, ExprError>,
}

impl Rule {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let program = expr::parse(&source);
        Self { source, program }
    }

    /// The expression as written in the definition.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> Result<&Expr, &ExprError> {
        self.program.as_ref()
    }
}

impl From<String> for Rule {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

impl From<&str> for Rule {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Variables a rule can reference.
///
/// | name          | content                               |
/// |---------------|---------------------------------------|
/// | `raw`         | body text as received                 |
/// | `body`        | decoded body                          |
/// | `routeParams` | parameters captured from the path     |
/// | `headers`     | headers by canonical name             |
/// | `cookies`     | cookies by name                       |
/// | `queryParams` | query parameters                      |
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    vars: Map<String, Value>,
}

impl RuleContext {
    pub fn from_request(request: &NormalizedRequest) -> Self {
        let mut vars = Map::new();
        vars.insert("raw".to_string(), Value::String(request.raw_body.clone()));
        vars.insert("body".to_string(), Value::Object(request.body.clone()));
        vars.insert("routeParams".to_string(), params_value(&request.route_params));
        vars.insert("headers".to_string(), params_value(&request.headers));
        vars.insert("cookies".to_string(), params_value(&request.cookies));
        vars.insert("queryParams".to_string(), params_value(&request.query_params));
        Self { vars }
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }
}

fn params_value(params: &Params) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Evaluates one rule against a request.
///
/// Other engines read [`Rule::source`]; the built-in one runs the program
/// parsed at load time.
pub trait RuleEvaluator: Send + Sync + Debug {
    fn evaluate(&self, rule: &Rule, ctx: &RuleContext) -> Result<bool, RuleError>;
}

/// Built-in evaluator backed by [`crate::expr`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl RuleEvaluator for ExprEvaluator {
    fn evaluate(&self, rule: &Rule, ctx: &RuleContext) -> Result<bool, RuleError> {
        let program = rule.program().map_err(|e| e.clone())?;
        match program.eval(ctx.vars())? {
            Value::Bool(result) => Ok(result),
            _ => Err(RuleError::NotBoolean(rule.source().to_string())),
        }
    }
}

/// True when `rules` is non-empty and every rule evaluates to true.
///
/// A rule that fails to parse or evaluate counts as false.
pub fn rules_satisfied(evaluator: &dyn RuleEvaluator, rules: &[Rule], ctx: &RuleContext) -> bool {
    if rules.is_empty() {
        return false;
    }

    rules.iter().all(|rule| match evaluator.evaluate(rule, ctx) {
        Ok(result) => result,
        Err(e) => {
            debug!(rule = %rule, error = %e, "Rule evaluation failed");
            false
        }
    })
}
