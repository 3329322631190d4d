use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

use super::flux::read_json;
use super::imaging::{average_color_hex, decode_image, encode_png};
use super::{optional_str, required_str, GenerationContext, GenerationResult, Generator, GeneratorError};
use crate::validation::Args;

pub const DEFAULT_PIXELLAB_API_BASE: &str = "https://api.pixellab.ai/v1";
pub const PIXELLAB_KEY_ENV: &str = "PIXELLAB_API_KEY";

const SOURCE_SIZE: u32 = 128;
const OUTPUT_SIZE: u32 = 1024;

pub struct PixelLabGenerator {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

impl PixelLabGenerator {
    pub fn new(http: Client, api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }
}

pub fn pixellab_model(args: &Args) -> Result<&str, GeneratorError> {
    match optional_str(args, "model").unwrap_or("pixflux") {
        model @ ("pixflux" | "bitforge") => Ok(model),
        other => Err(GeneratorError::InvalidArgument(format!(
            "Unknown PixelLab model: {other}"
        ))),
    }
}

pub fn pixellab_payload(prompt: &str, no_background: bool) -> Value {
    json!({
        "description": prompt,
        "image_size": {"width": SOURCE_SIZE, "height": SOURCE_SIZE},
        "no_background": no_background,
    })
}

/// Decodes the base64 sprite and scales it up without smoothing.
pub fn upscale_sprite(response: &Value) -> Result<(Vec<u8>, String), GeneratorError> {
    let encoded = response
        .pointer("/image/base64")
        .and_then(Value::as_str)
        .ok_or_else(|| GeneratorError::Upstream(String::from("PixelLab returned no image")))?;
    let encoded = encoded
        .split_once(";base64,")
        .map(|(_, data)| data)
        .unwrap_or(encoded);
    let bytes = BASE64_STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| GeneratorError::Upstream(format!("PixelLab image base64 decode failed: {e}")))?;
    let sprite = decode_image(bytes.as_slice())?;
    let scaled = sprite.resize_exact(OUTPUT_SIZE, OUTPUT_SIZE, FilterType::Nearest);
    Ok((encode_png(&scaled)?, average_color_hex(&scaled)))
}

#[async_trait]
impl Generator for PixelLabGenerator {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let prompt = required_str(args, "prompt")?;
        let model = pixellab_model(args)?;
        let no_background = args
            .get("no_background")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GeneratorError::MissingCredential(PIXELLAB_KEY_ENV))?;

        info!(request_id = %ctx.request_id, model, no_background, "pixellab generation");
        let response = self
            .http
            .post(format!("{}/generate-image-{model}", self.api_base))
            .bearer_auth(api_key)
            .json(&pixellab_payload(prompt, no_background))
            .send()
            .await
            .map_err(|e| GeneratorError::Upstream(format!("PixelLab request failed: {e}")))?;
        let body = read_json(response)
            .await
            .map_err(|source| GeneratorError::Transport {
                context: String::from("PixelLab generation"),
                source,
            })?;

        let (buffer, color) = upscale_sprite(&body)?;
        Ok(GenerationResult::new(buffer, OUTPUT_SIZE, OUTPUT_SIZE).with_color(color))
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::generators::imaging::inspect_image;

    #[test]
    fn payload_uses_fixed_sprite_size() {
        assert_eq!(
            pixellab_payload("a knight", true),
            json!({
                "description": "a knight",
                "image_size": {"width": 128, "height": 128},
                "no_background": true,
            })
        );
    }

    #[test]
    fn model_defaults_to_pixflux_and_rejects_unknown() {
        let empty = Args::new();
        assert_eq!(pixellab_model(&empty).expect("default"), "pixflux");
        let mut args = Args::new();
        args.insert(String::from("model"), json!("dalle"));
        assert!(pixellab_model(&args).is_err());
    }

    #[test]
    fn sprite_is_scaled_with_hard_edges() {
        let mut sprite = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        sprite.put_pixel(1, 0, Rgba([255, 255, 255, 255]));
        let png = encode_png(&DynamicImage::ImageRgba8(sprite)).expect("encode");
        let response = json!({"image": {"base64": BASE64_STANDARD.encode(png)}});

        let (buffer, _color) = upscale_sprite(&response).expect("scaled");
        let info = inspect_image(buffer.as_slice()).expect("png");
        assert_eq!((info.width, info.height), (1024, 1024));
        let scaled = decode_image(buffer.as_slice()).expect("decode").to_rgba8();
        assert_eq!(*scaled.get_pixel(511, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*scaled.get_pixel(512, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn missing_image_is_upstream_error() {
        let err = upscale_sprite(&json!({"usage": {}})).expect_err("no image");
        assert!(matches!(err, GeneratorError::Upstream(_)));
    }
}
