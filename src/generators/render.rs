use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use rand::Rng;

use super::bitmap_font::{draw_centered, TextLayout};
use super::imaging::{encode_png, parse_hex_color, to_hex};
use super::{optional_str, required_str, GenerationContext, GenerationResult, Generator, GeneratorError};
use crate::validation::Args;

pub const CANVAS_SIZE: u32 = 1024;
const DEFAULT_TEXT_COLOR: &str = "#000000";

pub struct CenteredTextGenerator;

#[async_trait]
impl Generator for CenteredTextGenerator {
    async fn generate(
        &self,
        args: &Args,
        _ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let text = required_str(args, "text")?.to_string();
        let color_hex = optional_str(args, "color").unwrap_or(DEFAULT_TEXT_COLOR);
        let color = parse_hex_color(color_hex).ok_or_else(|| {
            GeneratorError::InvalidArgument(format!("Invalid hex color format: {color_hex}"))
        })?;

        let buffer = run_blocking(move || render_centered_text(text.as_str(), color)).await?;
        Ok(GenerationResult::new(buffer, CANVAS_SIZE, CANVAS_SIZE).with_color(to_hex(color)))
    }
}

pub fn render_centered_text(text: &str, color: Rgba<u8>) -> Result<Vec<u8>, GeneratorError> {
    let mut canvas = RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba([255, 255, 255, 255]));
    draw_centered(&mut canvas, text, color, TextLayout::default());
    Ok(encode_png(&DynamicImage::ImageRgba8(canvas))?)
}

pub struct GradientCircleGenerator;

#[async_trait]
impl Generator for GradientCircleGenerator {
    async fn generate(
        &self,
        _args: &Args,
        _ctx: &GenerationContext,
    ) -> Result<GenerationResult, GeneratorError> {
        let palette = GradientPalette::random(&mut rand::thread_rng());
        let circle = palette.circle;
        let buffer = run_blocking(move || render_gradient_circle(&palette)).await?;
        Ok(GenerationResult::new(buffer, CANVAS_SIZE, CANVAS_SIZE).with_color(to_hex(circle)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GradientPalette {
    /// Top-left, top-right, bottom-left, bottom-right.
    pub corners: [Rgba<u8>; 4],
    pub circle: Rgba<u8>,
}

impl GradientPalette {
    pub fn random(rng: &mut impl Rng) -> Self {
        let mut color = || Rgba([rng.gen(), rng.gen(), rng.gen(), 255]);
        Self {
            corners: [color(), color(), color(), color()],
            circle: color(),
        }
    }
}

pub fn render_gradient_circle(palette: &GradientPalette) -> Result<Vec<u8>, GeneratorError> {
    let size = CANVAS_SIZE;
    let max = (size - 1) as f32;
    let [tl, tr, bl, br] = palette.corners;
    let mut canvas = RgbaImage::from_fn(size, size, |x, y| {
        let u = x as f32 / max;
        let v = y as f32 / max;
        let mut out = [0u8; 4];
        for (i, channel) in out.iter_mut().enumerate().take(3) {
            let top = lerp(f32::from(tl[i]), f32::from(tr[i]), u);
            let bottom = lerp(f32::from(bl[i]), f32::from(br[i]), u);
            *channel = lerp(top, bottom, v).round().clamp(0.0, 255.0) as u8;
        }
        out[3] = 255;
        Rgba(out)
    });

    let center = size as f32 / 2.0;
    let radius = size as f32 * 0.3;
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - center;
        let dy = y as f32 + 0.5 - center;
        if dx * dx + dy * dy <= radius * radius {
            *pixel = palette.circle;
        }
    }
    Ok(encode_png(&DynamicImage::ImageRgba8(canvas))?)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

async fn run_blocking<F>(work: F) -> Result<Vec<u8>, GeneratorError>
where
    F: FnOnce() -> Result<Vec<u8>, GeneratorError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|join_error| GeneratorError::Upstream(format!("render task failed: {join_error}")))?
}
