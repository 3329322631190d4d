use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::Client;
use tracing::debug;

use super::GeneratorError;

/// Upper bound for caller-supplied source images.
pub const MAX_INPUT_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Fetches caller-supplied images by URL.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn download(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, GeneratorError>;
}

pub type SharedImageSource = Arc<dyn ImageSource>;

#[derive(Clone)]
pub struct HttpImageSource {
    http: Client,
}

impl HttpImageSource {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, GeneratorError> {
        let parsed = parse_image_url(url)?;
        let mut response = self.http.get(parsed).send().await.map_err(|e| {
            GeneratorError::Upstream(format!("failed to download source image ({url}): {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeneratorError::Upstream(format!(
                "source image download failed ({}): {url}",
                status.as_u16()
            )));
        }
        let mut buffer = CappedBuffer::new(max_bytes, response.content_length())?;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            GeneratorError::Upstream(format!("failed reading source image ({url}): {e}"))
        })? {
            buffer.push(chunk.as_ref())?;
        }
        let bytes = buffer.into_inner();
        debug!(url = %url, bytes = bytes.len(), "source image downloaded");
        Ok(bytes)
    }
}

/// Accumulates a streamed body, failing as soon as it passes `limit`.
#[derive(Debug)]
pub struct CappedBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl CappedBuffer {
    /// A declared length over the limit fails before any body is read.
    pub fn new(limit: usize, declared: Option<u64>) -> Result<Self, GeneratorError> {
        if let Some(declared) = declared {
            check_payload_size(usize::try_from(declared).unwrap_or(usize::MAX), limit)?;
        }
        Ok(Self {
            bytes: Vec::new(),
            limit,
        })
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), GeneratorError> {
        check_payload_size(self.bytes.len().saturating_add(chunk.len()), self.limit)?;
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn check_payload_size(actual: usize, limit: usize) -> Result<(), GeneratorError> {
    if actual > limit {
        return Err(GeneratorError::PayloadTooLarge { limit, actual });
    }
    Ok(())
}

/// Size-checks and base64-encodes an edit source image.
pub fn encode_input_image(bytes: &[u8], limit: usize) -> Result<String, GeneratorError> {
    check_payload_size(bytes.len(), limit)?;
    Ok(BASE64_STANDARD.encode(bytes))
}

pub fn parse_image_url(raw: &str) -> Result<url::Url, GeneratorError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| GeneratorError::InvalidArgument(format!("invalid image_url '{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GeneratorError::InvalidArgument(format!(
            "image_url must be http(s): {raw}"
        )));
    }
    Ok(parsed)
}
