//! Request matching logic.
//!
//! Walks the index tiers in priority order (exact, parameterized, wildcard)
//! and returns the first definition whose path pattern matches.

use http::Method;
use tracing::debug;

use crate::index::{Definition, DefinitionIndex, Tier};
use crate::path::RouteParams;

/// Result of matching a request against the index.
#[derive(Debug)]
pub struct MatchResult<'a> {
    /// The matched definition
    pub definition: &'a Definition,
    /// Route parameters captured from the path
    pub route_params: RouteParams,
}

/// Find the highest-priority definition for a request.
///
/// `hosts` lists the host forms to look up, most specific first (for
/// example `api.local:8080` then `api.local`). Within a tier definitions
/// are tried in declaration order.
pub fn find_match<'a>(
    index: &'a DefinitionIndex,
    hosts: &[&str],
    method: &Method,
    path: &str,
) -> Option<MatchResult<'a>> {
    for tier in Tier::ALL {
        for host in hosts {
            for definition in index.tier(tier, host, method) {
                if let Some(params) = definition.pattern().captures(path) {
                    debug!(
                        definition = %definition.label(),
                        tier = ?tier,
                        path = %path,
                        "Path matched definition"
                    );
                    let route_params = match tier {
                        Tier::Exact => RouteParams::new(),
                        Tier::Parameterized | Tier::Wildcard => params,
                    };
                    return Some(MatchResult {
                        definition,
                        route_params,
                    });
                }
            }
        }
    }

    None
}
