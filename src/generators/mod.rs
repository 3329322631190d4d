pub mod adapters;
pub mod advanced;
pub mod bitmap_font;
pub mod flux;
pub mod imaging;
pub mod pixellab;
pub mod render;
pub mod replicate;
pub mod source;
pub mod upload;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::GatewaySettings;
use crate::poller::{CancelSignal, JobError, JobPoller, TransportError};
use crate::validation::Args;

use self::flux::{FluxApi, FluxEditGenerator, FluxGenerator, FluxModel};
use self::pixellab::PixelLabGenerator;
use self::render::{CenteredTextGenerator, GradientCircleGenerator};
use self::replicate::{ReplicateApi, ReplicateGenerator};
use self::source::{HttpImageSource, SharedImageSource};
use self::upload::UploadImageGenerator;

/// A finished image. Dimensions are in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub buffer: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color: Option<String>,
    pub extra: Map<String, Value>,
}

impl GenerationResult {
    pub fn new(buffer: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            buffer,
            width,
            height,
            color: None,
            extra: Map::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// Per-request context handed to generators.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub request_id: String,
    pub cancel: CancelSignal,
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("input image is {actual} bytes; the limit is {limit} bytes")]
    PayloadTooLarge { limit: usize, actual: usize },
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Upstream(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError>;
}

pub type SharedGenerator = Arc<dyn Generator>;

/// Method key → generator, aligned with the capability registry.
pub type GeneratorTable = IndexMap<String, SharedGenerator>;

pub(crate) fn required_str<'a>(args: &'a Args, field: &str) -> Result<&'a str, GeneratorError> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GeneratorError::InvalidArgument(format!("Field '{field}' is required")))
}

pub(crate) fn optional_str<'a>(args: &'a Args, field: &str) -> Option<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn build_http_client(timeout: Duration) -> Result<Client, GeneratorError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("imagegen-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GeneratorError::Upstream(format!("http client init failed: {e}")))
}

/// The shipped generator bindings for [`crate::registry::default_registry`].
pub fn default_generators(settings: &GatewaySettings) -> Result<GeneratorTable, GeneratorError> {
    let http = build_http_client(settings.http_timeout)?;
    let source: SharedImageSource = Arc::new(HttpImageSource::new(http.clone()));
    let flux_api = Arc::new(FluxApi::new(
        http.clone(),
        settings.flux.api_base.clone(),
        settings.flux.api_key.clone(),
    ));
    let flux_poller = Arc::new(JobPoller::new(settings.flux.poll_interval));
    let replicate_api = Arc::new(ReplicateApi::new(
        http.clone(),
        settings.replicate.api_base.clone(),
        settings.replicate.api_token.clone(),
    ));

    let flux = |model: FluxModel| -> SharedGenerator {
        Arc::new(FluxGenerator::new(flux_api.clone(), flux_poller.clone(), model))
    };

    let mut table: GeneratorTable = IndexMap::new();
    table.insert(String::from("fluxImage"), flux(FluxModel::Pro));
    table.insert(String::from("fluxImageFlex"), flux(FluxModel::Flex));
    table.insert(String::from("fluxImageKlein"), flux(FluxModel::Klein));
    table.insert(
        String::from("fluxImageEdit"),
        Arc::new(FluxEditGenerator::new(
            flux_api.clone(),
            flux_poller.clone(),
            source.clone(),
        )),
    );
    table.insert(
        String::from("pixelLabImage"),
        Arc::new(PixelLabGenerator::new(
            http.clone(),
            settings.pixellab.api_base.clone(),
            settings.pixellab.api_key.clone(),
        )),
    );
    table.insert(
        String::from("uploadImage"),
        Arc::new(UploadImageGenerator::new(source)),
    );
    table.insert(
        String::from("replicate"),
        Arc::new(ReplicateGenerator::new(
            replicate_api,
            Arc::new(JobPoller::new(settings.replicate.poll_interval)),
        )),
    );
    table.insert(
        String::from("gradientCircle"),
        Arc::new(GradientCircleGenerator),
    );
    table.insert(
        String::from("centeredTextOnWhite"),
        Arc::new(CenteredTextGenerator),
    );
    Ok(table)
}
