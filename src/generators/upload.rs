use async_trait::async_trait;
use image::imageops::FilterType;
use tracing::info;

use super::imaging::{average_color_hex, decode_image, encode_png};
use super::source::{SharedImageSource, MAX_INPUT_IMAGE_BYTES};
use super::{required_str, GenerationContext, GenerationResult, Generator, GeneratorError};
use crate::validation::Args;

const OUTPUT_SIZE: u32 = 1024;

/// Fetches an image by URL and normalises it to a square PNG.
pub struct UploadImageGenerator {
    source: SharedImageSource,
}

impl UploadImageGenerator {
    pub fn new(source: SharedImageSource) -> Self {
        Self { source }
    }
}

/// Cover-resizes to the output square, cropping the overflow evenly.
pub fn normalize_upload(bytes: &[u8]) -> Result<(Vec<u8>, String), GeneratorError> {
    let decoded = decode_image(bytes)?;
    let square = decoded.resize_to_fill(OUTPUT_SIZE, OUTPUT_SIZE, FilterType::CatmullRom);
    Ok((encode_png(&square)?, average_color_hex(&square)))
}

#[async_trait]
impl Generator for UploadImageGenerator {
    async fn generate(
        &self,
        args: &Args,
        ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let image_url = required_str(args, "image_url")?;
        let bytes = self.source.download(image_url, MAX_INPUT_IMAGE_BYTES).await?;
        info!(request_id = %ctx.request_id, bytes = bytes.len(), "upload image fetched");

        let (buffer, color) = tokio::task::spawn_blocking(move || normalize_upload(bytes.as_slice()))
            .await
            .map_err(|e| GeneratorError::Upstream(format!("image task failed: {e}")))??;
        Ok(GenerationResult::new(buffer, OUTPUT_SIZE, OUTPUT_SIZE).with_color(color))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::json;

    use super::*;
    use crate::generators::imaging::inspect_image;
    use crate::generators::source::ImageSource;
    use crate::poller::never_cancelled;

    struct RecordingSource {
        bytes: Vec<u8>,
        requested: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl ImageSource for RecordingSource {
        async fn download(&self, url: &str, max_bytes: usize) -> Result<Vec<u8>, GeneratorError> {
            self.requested
                .lock()
                .expect("mutex poisoned")
                .push((url.to_string(), max_bytes));
            Ok(self.bytes.clone())
        }
    }

    #[tokio::test]
    async fn wide_image_is_cropped_to_square() {
        let wide = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([0, 128, 255])));
        let source = Arc::new(RecordingSource {
            bytes: encode_png(&wide).expect("encode"),
            requested: Mutex::new(Vec::new()),
        });
        let generator = UploadImageGenerator::new(source.clone());
        let args = json!({"image_url": "https://img.test/wide.png"})
            .as_object()
            .cloned()
            .expect("object");
        let ctx = GenerationContext {
            request_id: String::from("u"),
            cancel: never_cancelled(),
        };

        let result = generator.generate(&args, &ctx).await.expect("uploaded");
        let info = inspect_image(result.buffer.as_slice()).expect("png");
        assert_eq!((info.width, info.height), (1024, 1024));
        assert_eq!(result.color.as_deref(), Some("#0080ff"));
        assert_eq!(
            source.requested.lock().expect("mutex poisoned").as_slice(),
            &[(String::from("https://img.test/wide.png"), MAX_INPUT_IMAGE_BYTES)]
        );
    }

    #[test]
    fn undecodable_bytes_fail() {
        assert!(matches!(
            normalize_upload(b"not an image"),
            Err(GeneratorError::Image(_))
        ));
    }
}
