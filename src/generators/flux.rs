//! Black Forest Labs Flux backend.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use super::imaging::ensure_png;
use super::source::{encode_input_image, SharedImageSource, MAX_INPUT_IMAGE_BYTES};
use super::{optional_str, required_str, GenerationContext, GenerationResult, Generator, GeneratorError};
use crate::poller::{
    Clock, JobHandle, JobOutcome, JobPoller, JobStatus, JobTransport, PollReport, TokioClock,
    TransportError,
};
use crate::registry::catalog::FLUX_RESOLUTION_DEFAULT;
use crate::validation::Args;

pub const DEFAULT_FLUX_API_BASE: &str = "https://api.bfl.ai/v1";
pub const FLUX_KEY_ENV: &str = "BFL_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluxModel {
    Pro,
    Flex,
    Klein,
}

impl FluxModel {
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Pro => "flux-2-pro",
            Self::Flex => "flux-2-flex",
            Self::Klein => "flux-klein-pro",
        }
    }
}

/// Submission dimensions for a Klein resolution preset.
pub fn resolution_dimensions(preset: &str) -> Option<(u32, u32)> {
    match preset {
        "nes_8bit" => Some((256, 240)),
        "snes_16bit" => Some((512, 448)),
        "ai_legacy" => Some((512, 512)),
        "ai_classic" => Some((768, 768)),
        "ai_latest" => Some((1024, 1024)),
        _ => None,
    }
}

/// Shared credentials and HTTP client for every Flux endpoint.
#[derive(Clone)]
pub struct FluxApi {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

impl FluxApi {
    pub fn new(http: Client, api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn endpoint(self: &Arc<Self>, model: FluxModel) -> FluxEndpoint {
        FluxEndpoint {
            api: Arc::clone(self),
            model,
        }
    }

    fn key(&self) -> Result<&str, TransportError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| TransportError::Network(format!("{FLUX_KEY_ENV} is not set")))
    }
}

/// One Flux model endpoint as a job transport.
#[derive(Clone)]
pub struct FluxEndpoint {
    api: Arc<FluxApi>,
    model: FluxModel,
}

#[async_trait]
impl JobTransport for FluxEndpoint {
    fn name(&self) -> &str {
        self.model.endpoint()
    }

    fn missing_credential(&self) -> Option<&'static str> {
        self.api.api_key.is_none().then_some(FLUX_KEY_ENV)
    }

    async fn submit(&self, payload: &Value) -> Result<(String, String, Value), TransportError> {
        let url = format!("{}/{}", self.api.api_base, self.model.endpoint());
        let response = self
            .api
            .http
            .post(url.as_str())
            .header("x-key", self.api.key()?)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let mut body = read_json(response).await?;

        let polling_url = body
            .as_object_mut()
            .and_then(|map| map.remove("polling_url"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| TransportError::Decode(format!("no polling_url in {body}")))?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| polling_url.clone());
        Ok((id, polling_url, body))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollReport, TransportError> {
        let response = self
            .api
            .http
            .get(handle.polling_location.as_str())
            .header("x-key", self.api.key()?)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let payload = read_json(response).await?;
        Ok(PollReport {
            status: classify_flux_status(&payload),
            payload,
        })
    }

    async fn fetch(&self, asset_location: &str) -> Result<Vec<u8>, TransportError> {
        fetch_bytes(&self.api.http, asset_location).await
    }
}

pub fn classify_flux_status(payload: &Value) -> JobStatus {
    match payload.get("status").and_then(Value::as_str) {
        Some("Pending") => JobStatus::Pending,
        Some("Ready") => JobStatus::Ready {
            asset_location: payload
                .pointer("/result/sample")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        Some(other) => JobStatus::Other(other.to_string()),
        None => JobStatus::Other(String::from("<missing>")),
    }
}

pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| TransportError::Decode(e.to_string()))
}

pub(crate) async fn fetch_bytes(http: &Client, url: &str) -> Result<Vec<u8>, TransportError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|e| TransportError::Network(e.to_string()))
}

pub fn flux_payload(prompt: &str, width: u32, height: u32) -> Value {
    json!({
        "prompt": prompt,
        "prompt_upsampling": false,
        "seed": 0,
        "width": width,
        "height": height,
        "output_format": "png",
    })
}

async fn run_flux_job<C: Clock>(
    transport: &dyn JobTransport,
    poller: &JobPoller<C>,
    payload: Value,
    ctx: &GenerationContext,
    (width, height): (u32, u32),
) -> Result<GenerationResult, GeneratorError> {
    let outcome = poller.run(transport, &payload, &ctx.cancel).await?;
    Ok(outcome_to_result(outcome, width, height))
}

fn outcome_to_result(outcome: JobOutcome, width: u32, height: u32) -> GenerationResult {
    let mut result = GenerationResult::new(
        ensure_png(outcome.buffer),
        outcome.width.unwrap_or(width),
        outcome.height.unwrap_or(height),
    );
    result.extra.insert(String::from("job_id"), Value::from(outcome.job_id));
    result
        .extra
        .insert(String::from("poll_count"), Value::from(outcome.poll_count));
    result.extra.insert(
        String::from("duration_ms"),
        Value::from(outcome.duration.as_millis() as u64),
    );
    result
}

fn ensure_credential(transport: &dyn JobTransport) -> Result<(), GeneratorError> {
    match transport.missing_credential() {
        Some(name) => Err(GeneratorError::MissingCredential(name)),
        None => Ok(()),
    }
}

/// Text-to-image on one Flux model.
pub struct FluxGenerator<C = TokioClock> {
    transport: Arc<dyn JobTransport>,
    poller: Arc<JobPoller<C>>,
    model: FluxModel,
}

impl FluxGenerator<TokioClock> {
    pub fn new(api: Arc<FluxApi>, poller: Arc<JobPoller>, model: FluxModel) -> Self {
        Self::with_transport(Arc::new(api.endpoint(model)), poller, model)
    }
}

impl<C: Clock> FluxGenerator<C> {
    pub fn with_transport(
        transport: Arc<dyn JobTransport>,
        poller: Arc<JobPoller<C>>,
        model: FluxModel,
    ) -> Self {
        Self {
            transport,
            poller,
            model,
        }
    }

    fn dimensions(&self, args: &Args) -> Result<(u32, u32), GeneratorError> {
        if self.model != FluxModel::Klein {
            return Ok((1024, 1024));
        }
        let preset = optional_str(args, "resolution").unwrap_or(FLUX_RESOLUTION_DEFAULT);
        resolution_dimensions(preset)
            .ok_or_else(|| GeneratorError::InvalidArgument(format!("Unknown resolution: {preset}")))
    }
}

#[async_trait]
impl<C: Clock + 'static> Generator for FluxGenerator<C> {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let prompt = required_str(args, "prompt")?;
        let dimensions = self.dimensions(args)?;
        ensure_credential(self.transport.as_ref())?;

        info!(
            request_id = %ctx.request_id,
            model = self.model.endpoint(),
            width = dimensions.0,
            height = dimensions.1,
            "flux generation"
        );
        let payload = flux_payload(prompt, dimensions.0, dimensions.1);
        run_flux_job(self.transport.as_ref(), &self.poller, payload, ctx, dimensions).await
    }
}

/// Image edit on Flux Pro with a caller-supplied source image.
pub struct FluxEditGenerator<C = TokioClock> {
    transport: Arc<dyn JobTransport>,
    poller: Arc<JobPoller<C>>,
    source: SharedImageSource,
}

impl FluxEditGenerator<TokioClock> {
    pub fn new(api: Arc<FluxApi>, poller: Arc<JobPoller>, source: SharedImageSource) -> Self {
        Self::with_transport(Arc::new(api.endpoint(FluxModel::Pro)), poller, source)
    }
}

impl<C: Clock> FluxEditGenerator<C> {
    pub fn with_transport(
        transport: Arc<dyn JobTransport>,
        poller: Arc<JobPoller<C>>,
        source: SharedImageSource,
    ) -> Self {
        Self {
            transport,
            poller,
            source,
        }
    }
}

#[async_trait]
impl<C: Clock + 'static> Generator for FluxEditGenerator<C> {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let image_url = required_str(args, "image_url")?;
        let prompt = required_str(args, "prompt")?;
        ensure_credential(self.transport.as_ref())?;

        let bytes = self.source.download(image_url, MAX_INPUT_IMAGE_BYTES).await?;
        let input_image = encode_input_image(bytes.as_slice(), MAX_INPUT_IMAGE_BYTES)?;
        info!(
            request_id = %ctx.request_id,
            source_bytes = bytes.len(),
            "flux image edit"
        );

        let mut payload = flux_payload(prompt, 1024, 1024);
        if let Some(map) = payload.as_object_mut() {
            map.insert(String::from("input_image"), Value::from(input_image));
        }
        run_flux_job(self.transport.as_ref(), &self.poller, payload, ctx, (1024, 1024)).await
    }
}
