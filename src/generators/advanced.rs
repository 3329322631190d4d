//! Meta-methods outside the capability manifest.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::info;

use super::{GenerationContext, GenerationResult, Generator, GeneratorError, SharedGenerator};
use crate::validation::Args;

pub const ADVANCED_QUERY: &str = "advanced_query";
pub const ADVANCED_GENERATE: &str = "advanced_generate";
pub const ADVANCED_GENERATE_CREDITS: f64 = 3.0;

const BASE_PROMPT: &str = "the text \"advanced generate\" in large gold letters, clean typography on a simple black background";

pub fn is_meta_method(method: &str) -> bool {
    method == ADVANCED_QUERY || method == ADVANCED_GENERATE
}

pub fn advanced_query_response(_args: &Args) -> Value {
    json!({"supported": true, "cost": ADVANCED_GENERATE_CREDITS as u32})
}

/// Item counts per `source`, most frequent first. Ties keep first-seen order.
pub fn count_by_source(items: &[Value]) -> Vec<(String, usize)> {
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for item in items {
        let source = match item.get("source") {
            None | Some(Value::Null) => String::from("unknown"),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        *counts.entry(source).or_default() += 1;
    }
    let mut ordered: Vec<(String, usize)> = counts.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1));
    ordered
}

pub fn advanced_prompt(args: &Args) -> String {
    let items = args
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if items.is_empty() {
        return BASE_PROMPT.to_string();
    }
    let parts = count_by_source(items)
        .into_iter()
        .map(|(source, count)| format!("{source}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{BASE_PROMPT}\nUnder this show the text \"items: {}\" and below that \"{parts}\"",
        items.len()
    )
}

/// Renders the synthesized prompt through another generator.
pub struct AdvancedGenerator {
    renderer: SharedGenerator,
}

impl AdvancedGenerator {
    pub fn new(renderer: SharedGenerator) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl Generator for AdvancedGenerator {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let prompt = advanced_prompt(args);
        info!(request_id = %ctx.request_id, prompt_len = prompt.len(), "advanced generate");
        let mut delegated = Args::new();
        delegated.insert(String::from("prompt"), Value::from(prompt));
        self.renderer.generate(&delegated, ctx).await
    }
}
