//! Response selection.

use tracing::debug;

use crate::index::Response;
use crate::rule::{rules_satisfied, RuleContext, RuleEvaluator};

/// Pick the response for a matched definition.
///
/// The first response with a non-empty, fully satisfied rule set wins;
/// otherwise the first default (rule-less) response. `None` when neither
/// exists.
pub fn select_response<'a>(
    responses: &'a [Response],
    evaluator: &dyn RuleEvaluator,
    ctx: &RuleContext,
) -> Option<&'a Response> {
    let ruled = responses
        .iter()
        .enumerate()
        .find(|(_, r)| !r.is_default() && rules_satisfied(evaluator, &r.rules, ctx));

    if let Some((position, response)) = ruled {
        debug!(position, status = response.status, "Selected rule-bearing response");
        return Some(response);
    }

    let fallback = responses.iter().enumerate().find(|(_, r)| r.is_default());
    if let Some((position, response)) = fallback {
        debug!(position, status = response.status, "Selected default response");
    }
    fallback.map(|(_, r)| r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::NormalizedRequest;
    use crate::rule::{ExprEvaluator, Rule};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn response(status: u16, rules: &[&str]) -> Response {
        Response {
            headers: BTreeMap::new(),
            rules: rules.iter().map(|s| Rule::new(*s)).collect(),
            delay: Duration::ZERO,
            status,
            enable_template: false,
            body: String::new(),
        }
    }

    fn ctx_with_body(body: Value) -> RuleContext {
        let mut request = NormalizedRequest::default();
        if let Value::Object(map) = body {
            request.body = map;
        }
        RuleContext::from_request(&request)
    }

    #[test]
    fn test_rule_response_or_default() {
        let responses = vec![
            response(201, &[r#"body.name == "William""#]),
            response(200, &[]),
        ];

        let william = ctx_with_body(json!({"name": "William"}));
        let selected = select_response(&responses, &ExprEvaluator, &william).unwrap();
        assert_eq!(selected.status, 201);

        let bob = ctx_with_body(json!({"name": "Bob"}));
        let selected = select_response(&responses, &ExprEvaluator, &bob).unwrap();
        assert_eq!(selected.status, 200);
    }

    #[test]
    fn test_rule_response_wins_over_earlier_default() {
        let responses = vec![
            response(200, &[]),
            response(202, &["body.age > 18"]),
            response(203, &["body.age > 10"]),
        ];
        let ctx = ctx_with_body(json!({"age": 30}));
        assert_eq!(
            select_response(&responses, &ExprEvaluator, &ctx).unwrap().status,
            202
        );
    }

    #[test]
    fn test_first_default_is_used() {
        let responses = vec![
            response(500, &["false"]),
            response(200, &[]),
            response(204, &[]),
        ];
        let ctx = ctx_with_body(json!({}));
        assert_eq!(
            select_response(&responses, &ExprEvaluator, &ctx).unwrap().status,
            200
        );
    }

    #[test]
    fn test_no_candidate() {
        let responses = vec![response(201, &["body.missing == 1"])];
        let ctx = ctx_with_body(json!({}));
        assert!(select_response(&responses, &ExprEvaluator, &ctx).is_none());
        assert!(select_response(&[], &ExprEvaluator, &ctx).is_none());
    }
}
