//! Mock resolution engine.
//!
//! A [`Resolver`] is loaded exactly once from one or more definition
//! sources and then resolves any number of requests concurrently without
//! locking.

use http::Request;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::body::ReplayReader;
use crate::config::Settings;
use crate::error::{MockError, Result};
use crate::index::DefinitionIndex;
use crate::matcher::find_match;
use crate::path::CompileOptions;
use crate::request::NormalizedRequest;
use crate::rule::{ExprEvaluator, RuleContext, RuleEvaluator};
use crate::selector::select_response;
use crate::source::DefinitionSource;
use crate::synth::{synthesize, SynthesizedResponse};
use crate::template::TemplateEngine;

/// Loads definitions once and resolves requests against them.
#[derive(Debug)]
pub struct Resolver {
    settings: Settings,
    evaluator: Arc<dyn RuleEvaluator>,
    template_engine: TemplateEngine,
    index: OnceLock<DefinitionIndex>,
}

impl Resolver {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            evaluator: Arc::new(ExprEvaluator),
            template_engine: TemplateEngine::new(),
            index: OnceLock::new(),
        }
    }

    /// Replace the built-in rule expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_template_engine(mut self, template_engine: TemplateEngine) -> Self {
        self.template_engine = template_engine;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.index.get().is_some()
    }

    /// The loaded index, if any.
    pub fn index(&self) -> Option<&DefinitionIndex> {
        self.index.get()
    }

    pub fn definition_count(&self) -> usize {
        self.index.get().map_or(0, DefinitionIndex::len)
    }

    /// Load every source and publish the resulting index.
    ///
    /// Succeeds at most once. The index only becomes visible when every
    /// source loaded and every definition compiled; on failure the
    /// resolver stays unloaded.
    pub fn load(&self, sources: &[&dyn DefinitionSource]) -> Result<usize> {
        if self.is_loaded() {
            return Err(MockError::Configuration(
                "definitions are already loaded".to_string(),
            ));
        }

        let mut specs = Vec::new();
        for source in sources {
            let loaded = source.load()?;
            debug!(source = source.name(), definitions = loaded.len(), "Loaded source");
            specs.extend(loaded);
        }

        let options = CompileOptions::new().case_sensitive(self.settings.case_sensitive_paths);
        let index = DefinitionIndex::build(specs, options)?;
        let count = index.len();

        self.index.set(index).map_err(|_| {
            MockError::Configuration("definitions are already loaded".to_string())
        })?;

        info!(
            definitions = count,
            sources = sources.len(),
            "Mock definitions loaded"
        );
        Ok(count)
    }

    /// Resolve a request to a mock response.
    ///
    /// `NotFound` and `NoMockResponse` mean no mock applies and the
    /// request should go to the real upstream. The request body is left
    /// rewound for that case.
    pub fn resolve(&self, request: &mut Request<ReplayReader>) -> Result<SynthesizedResponse> {
        let mut normalized = NormalizedRequest::from_request(request)?;

        let matched = self.index.get().and_then(|index| {
            find_match(
                index,
                &normalized.host_candidates(),
                &normalized.method,
                &normalized.endpoint,
            )
        });

        let Some(matched) = matched else {
            if self.settings.log_unmatched {
                info!(
                    host = %normalized.host,
                    method = %normalized.method,
                    path = %normalized.endpoint,
                    "No mock definition matched"
                );
            }
            return Err(MockError::NotFound {
                host: normalized.host,
                method: normalized.method.to_string(),
                path: normalized.endpoint,
            });
        };

        let definition = matched.definition;
        normalized.route_params = matched.route_params;
        normalized.validate_content_type()?;

        let ctx = RuleContext::from_request(&normalized);
        let response = select_response(definition.responses(), self.evaluator.as_ref(), &ctx)
            .ok_or_else(|| MockError::NoMockResponse {
                definition: definition.label(),
            })?;

        let synthesized = synthesize(response, &normalized, &self.template_engine)?;

        if self.settings.log_matches {
            info!(
                definition = %definition.label(),
                desc = %definition.desc(),
                status = synthesized.status,
                delay_ms = synthesized.delay.as_millis() as u64,
                "Request resolved to mock"
            );
        }

        Ok(synthesized)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
