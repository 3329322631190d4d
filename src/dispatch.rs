//! Method routing between the capability registry and generator bindings.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::generators::advanced::{
    advanced_query_response, is_meta_method, AdvancedGenerator, ADVANCED_GENERATE_CREDITS,
    ADVANCED_QUERY,
};
use crate::generators::{
    GenerationContext, GenerationResult, Generator, GeneratorError, GeneratorTable,
    SharedGenerator,
};
use crate::registry::CapabilityRegistry;
use crate::validation::{validate, Args, ValidationError};

/// Generator that renders `advanced_generate` prompts.
pub const ADVANCED_RENDERER_METHOD: &str = "fluxImage";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Missing required field: method")]
    MissingMethod { available_methods: Vec<String> },
    #[error("Unknown generation method: {method}")]
    UnknownMethod {
        method: String,
        available_methods: Vec<String>,
    },
    #[error("{source}")]
    Validation {
        method: String,
        #[source]
        source: ValidationError,
    },
    #[error("No handler registered for method: {0}")]
    HandlerMissing(String),
    #[error(
        "method table mismatch: no handler for [{}], no descriptor for [{}]",
        .missing_handlers.join(", "),
        .orphan_handlers.join(", ")
    )]
    HandlerMismatch {
        missing_handlers: Vec<String>,
        orphan_handlers: Vec<String>,
    },
    #[error("{source}")]
    Generation {
        method: String,
        #[source]
        source: GeneratorError,
    },
}

/// A binary image plus the credit weight charged for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReply {
    pub method: String,
    pub result: GenerationResult,
    pub credits: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Image(ImageReply),
    Json(Value),
}

pub struct Dispatcher {
    registry: CapabilityRegistry,
    generators: GeneratorTable,
    advanced: Option<AdvancedGenerator>,
}

impl Dispatcher {
    /// Binds generators to registry methods. Every registry key needs exactly
    /// one generator and every generator needs a registry key.
    pub fn new(
        registry: CapabilityRegistry,
        generators: GeneratorTable,
    ) -> Result<Self, DispatchError> {
        let keys = registry.key_set();
        let missing_handlers: Vec<String> = keys
            .iter()
            .filter(|key| !generators.contains_key(key.as_str()))
            .cloned()
            .collect();
        let mut orphan_handlers: Vec<String> = generators
            .keys()
            .filter(|key| !keys.contains(key.as_str()))
            .cloned()
            .collect();
        orphan_handlers.sort();
        if !missing_handlers.is_empty() || !orphan_handlers.is_empty() {
            return Err(DispatchError::HandlerMismatch {
                missing_handlers,
                orphan_handlers,
            });
        }

        let advanced = generators
            .get(ADVANCED_RENDERER_METHOD)
            .map(|renderer: &SharedGenerator| AdvancedGenerator::new(Arc::clone(renderer)));
        Ok(Self {
            registry,
            generators,
            advanced,
        })
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The capability document served on GET.
    pub fn describe(&self) -> Value {
        json!({
            "status": "operational",
            "last_check_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "methods": self.registry.manifest(),
        })
    }

    pub async fn generate(
        &self,
        method: Option<&str>,
        raw_args: &Args,
        ctx: &GenerationContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let method = match method.map(str::trim).filter(|m| !m.is_empty()) {
            Some(method) => method,
            None => {
                return Err(DispatchError::MissingMethod {
                    available_methods: self.registry.keys(),
                })
            }
        };

        if is_meta_method(method) {
            return self.generate_meta(method, raw_args, ctx).await;
        }

        let descriptor =
            self.registry
                .lookup(method)
                .ok_or_else(|| DispatchError::UnknownMethod {
                    method: method.to_string(),
                    available_methods: self.registry.keys(),
                })?;
        let args = validate(descriptor, raw_args).map_err(|source| {
            warn!(request_id = %ctx.request_id, method, error = %source, "arguments rejected");
            DispatchError::Validation {
                method: method.to_string(),
                source,
            }
        })?;
        let generator = self
            .generators
            .get(method)
            .ok_or_else(|| DispatchError::HandlerMissing(method.to_string()))?;

        let started = Instant::now();
        let result = generator
            .generate(&args, ctx)
            .await
            .map_err(|source| generation_failed(method, source))?;
        log_success(ctx, method, descriptor.credit_weight, &result, started);
        Ok(DispatchOutcome::Image(ImageReply {
            method: method.to_string(),
            result,
            credits: descriptor.credit_weight,
        }))
    }

    /// Meta-methods skip the registry and the argument validator.
    async fn generate_meta(
        &self,
        method: &str,
        raw_args: &Args,
        ctx: &GenerationContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        if method == ADVANCED_QUERY {
            info!(request_id = %ctx.request_id, method, "advanced query");
            return Ok(DispatchOutcome::Json(advanced_query_response(raw_args)));
        }
        let generator = self
            .advanced
            .as_ref()
            .ok_or_else(|| DispatchError::HandlerMissing(method.to_string()))?;
        let started = Instant::now();
        let result = generator
            .generate(raw_args, ctx)
            .await
            .map_err(|source| generation_failed(method, source))?;
        log_success(ctx, method, ADVANCED_GENERATE_CREDITS, &result, started);
        Ok(DispatchOutcome::Image(ImageReply {
            method: method.to_string(),
            result,
            credits: ADVANCED_GENERATE_CREDITS,
        }))
    }
}

fn generation_failed(method: &str, source: GeneratorError) -> DispatchError {
    error!(method, error = %source, "generation failed");
    DispatchError::Generation {
        method: method.to_string(),
        source,
    }
}

fn log_success(
    ctx: &GenerationContext,
    method: &str,
    credits: f64,
    result: &GenerationResult,
    started: Instant,
) {
    info!(
        request_id = %ctx.request_id,
        method,
        credits,
        width = result.width,
        height = result.height,
        bytes = result.buffer.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "image generated"
    );
}
