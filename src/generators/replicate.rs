//! Replicate predictions backend.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::info;

use super::adapters::adapt;
use super::flux::{fetch_bytes, read_json};
use super::imaging::ensure_png;
use super::{required_str, GenerationContext, GenerationResult, Generator, GeneratorError};
use crate::poller::{
    Clock, JobHandle, JobPoller, JobStatus, JobTransport, PollReport, TokioClock, TransportError,
};
use crate::validation::Args;

pub const DEFAULT_REPLICATE_API_BASE: &str = "https://api.replicate.com/v1";
pub const REPLICATE_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

const DEFAULT_DIMENSION: u32 = 1024;

#[derive(Clone)]
pub struct ReplicateApi {
    http: Client,
    api_base: String,
    api_token: Option<String>,
}

impl ReplicateApi {
    pub fn new(http: Client, api_base: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_token: api_token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn model(self: &Arc<Self>, model: &str) -> ReplicateModel {
        ReplicateModel {
            api: Arc::clone(self),
            model: model.trim().to_string(),
        }
    }

    fn token(&self) -> Result<&str, TransportError> {
        self.api_token
            .as_deref()
            .ok_or_else(|| TransportError::Network(format!("{REPLICATE_TOKEN_ENV} is not set")))
    }
}

/// Where and what to POST to create a prediction for `model`.
///
/// `owner/name:version` goes to `/predictions` with the version id in the
/// body; bare `owner/name` goes to the model's own predictions route.
pub fn prediction_request(model: &str, input: Map<String, Value>) -> (String, Value) {
    match model.split_once(':') {
        Some((_, version)) => (
            String::from("/predictions"),
            json!({"version": version, "input": input}),
        ),
        None => (
            format!("/models/{model}/predictions"),
            json!({"input": input}),
        ),
    }
}

pub fn classify_replicate_status(payload: &Value) -> JobStatus {
    match payload.get("status").and_then(Value::as_str) {
        Some("starting" | "processing") => JobStatus::Pending,
        Some("succeeded") => JobStatus::Ready {
            asset_location: payload.get("output").and_then(first_output_url),
        },
        Some(other) => JobStatus::Other(other.to_string()),
        None => JobStatus::Other(String::from("<missing>")),
    }
}

/// First image URL in a prediction output: a string, the first element of
/// an array, or an object's `url`.
pub fn first_output_url(output: &Value) -> Option<String> {
    let first = match output {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let candidate = match first {
        Value::String(url) => url.as_str(),
        Value::Object(map) => map.get("url").and_then(Value::as_str)?,
        _ => return None,
    };
    let accepted = candidate.starts_with("http://")
        || candidate.starts_with("https://")
        || candidate.starts_with("data:");
    accepted.then(|| candidate.to_string())
}

fn decode_data_url(url: &str) -> Result<Vec<u8>, TransportError> {
    let (meta, data) = url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| TransportError::Decode(String::from("malformed data URL")))?;
    if !meta.ends_with(";base64") {
        return Err(TransportError::Decode(String::from(
            "data URL output is not base64 encoded",
        )));
    }
    BASE64_STANDARD
        .decode(data.trim().as_bytes())
        .map_err(|e| TransportError::Decode(format!("data URL base64 decode failed: {e}")))
}

/// A prediction transport bound to one model.
#[derive(Clone)]
pub struct ReplicateModel {
    api: Arc<ReplicateApi>,
    model: String,
}

#[async_trait]
impl JobTransport for ReplicateModel {
    fn name(&self) -> &str {
        self.model.as_str()
    }

    fn missing_credential(&self) -> Option<&'static str> {
        self.api.api_token.is_none().then_some(REPLICATE_TOKEN_ENV)
    }

    async fn submit(&self, payload: &Value) -> Result<(String, String, Value), TransportError> {
        let input = payload
            .as_object()
            .cloned()
            .ok_or_else(|| TransportError::Decode(String::from("prediction input must be an object")))?;
        let (path, body) = prediction_request(self.model.as_str(), input);
        let response = self
            .api
            .http
            .post(format!("{}{}", self.api.api_base, path))
            .bearer_auth(self.api.token()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let created = read_json(response).await?;

        let id = created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Decode(format!("prediction without id: {created}")))?;
        let polling = created
            .pointer("/urls/get")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/predictions/{id}", self.api.api_base));
        Ok((id, polling, created))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollReport, TransportError> {
        let response = self
            .api
            .http
            .get(handle.polling_location.as_str())
            .bearer_auth(self.api.token()?)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let payload = read_json(response).await?;
        Ok(PollReport {
            status: classify_replicate_status(&payload),
            payload,
        })
    }

    async fn fetch(&self, asset_location: &str) -> Result<Vec<u8>, TransportError> {
        if asset_location.starts_with("data:") {
            return decode_data_url(asset_location);
        }
        fetch_bytes(&self.api.http, asset_location).await
    }
}

/// Splits validated args into the target model and its adapted input.
pub fn build_input(args: &Args) -> Result<(String, Map<String, Value>), GeneratorError> {
    let model = required_str(args, "model")?.to_string();
    let prompt = required_str(args, "prompt")?.to_string();

    let mut input = Map::new();
    input.insert(String::from("prompt"), Value::from(prompt));
    for (key, value) in args {
        if key != "model" && key != "prompt" {
            input.insert(key.clone(), value.clone());
        }
    }
    let adapted = adapt(model.as_str(), input);
    Ok((model, adapted))
}

/// Builds the prediction transport for a model chosen per request.
pub trait ModelTransports: Send + Sync {
    fn transport(&self, model: &str) -> Arc<dyn JobTransport>;
}

impl ModelTransports for Arc<ReplicateApi> {
    fn transport(&self, model: &str) -> Arc<dyn JobTransport> {
        Arc::new(self.model(model))
    }
}

pub struct ReplicateGenerator<C = TokioClock> {
    transports: Arc<dyn ModelTransports>,
    poller: Arc<JobPoller<C>>,
}

impl ReplicateGenerator<TokioClock> {
    pub fn new(api: Arc<ReplicateApi>, poller: Arc<JobPoller>) -> Self {
        Self::with_transports(Arc::new(api), poller)
    }
}

impl<C: Clock> ReplicateGenerator<C> {
    pub fn with_transports(transports: Arc<dyn ModelTransports>, poller: Arc<JobPoller<C>>) -> Self {
        Self { transports, poller }
    }
}

#[async_trait]
impl<C: Clock + 'static> Generator for ReplicateGenerator<C> {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let (model, input) = build_input(args)?;
        let transport = self.transports.transport(model.as_str());
        if let Some(name) = transport.missing_credential() {
            return Err(GeneratorError::MissingCredential(name));
        }

        info!(
            request_id = %ctx.request_id,
            model = %model,
            input_keys = ?input.keys().collect::<Vec<_>>(),
            "replicate run"
        );
        let outcome = self
            .poller
            .run(transport.as_ref(), &Value::Object(input), &ctx.cancel)
            .await?;

        let mut result = GenerationResult::new(
            ensure_png(outcome.buffer),
            outcome.width.unwrap_or(DEFAULT_DIMENSION),
            outcome.height.unwrap_or(DEFAULT_DIMENSION),
        );
        result.extra.insert(String::from("model"), Value::from(model));
        result
            .extra
            .insert(String::from("prediction_id"), Value::from(outcome.job_id));
        Ok(result)
    }
}
