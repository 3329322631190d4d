use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, Rgba};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// Best-effort header sniff. `None` when the bytes are not a known image.
pub fn inspect_image(bytes: &[u8]) -> Option<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(ImageInfo {
        width,
        height,
        format: format_label(format).to_string(),
    })
}

fn format_label(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Gif => "gif",
        other => other.extensions_str().first().copied().unwrap_or("unknown"),
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Re-encodes decodable non-PNG payloads as PNG; anything else passes
/// through untouched.
pub fn ensure_png(bytes: Vec<u8>) -> Vec<u8> {
    match inspect_image(bytes.as_slice()) {
        Some(info) if info.format == "png" => bytes,
        Some(_) => match decode_image(bytes.as_slice()).and_then(|img| encode_png(&img)) {
            Ok(png) => png,
            Err(error) => {
                tracing::warn!(error = %error, "png conversion failed; passing bytes through");
                bytes
            }
        },
        None => bytes,
    }
}

/// Parses `#rgb` or `#rrggbb`.
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => hex.to_string(),
        _ => return None,
    };
    let int = u32::from_str_radix(expanded.as_str(), 16).ok()?;
    Some(Rgba([
        ((int >> 16) & 0xff) as u8,
        ((int >> 8) & 0xff) as u8,
        (int & 0xff) as u8,
        255,
    ]))
}

pub fn to_hex(color: Rgba<u8>) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

pub fn average_color_hex(image: &DynamicImage) -> String {
    let rgb = image.to_rgb8();
    let count = u64::from(rgb.width()) * u64::from(rgb.height());
    if count == 0 {
        return String::from("#000000");
    }
    let mut sums = [0u64; 3];
    for pixel in rgb.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
    }
    to_hex(Rgba([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
        255,
    ]))
}
