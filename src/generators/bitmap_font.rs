//! 5x7 pixel font for the local text renderer.

use image::{Rgba, RgbaImage};

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;

/// Rows top to bottom; bit 4 is the leftmost column.
pub fn glyph(ch: char) -> [u8; 7] {
    lookup(ch)
        .or_else(|| lookup(ch.to_ascii_uppercase()))
        .or_else(|| lookup('?'))
        .unwrap_or([0; 7])
}

fn lookup(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b11110, 0b10001, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01110],
        'H' => [0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001, 0b10001],
        'I' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b11111],
        'J' => [0b11111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b11100, 0b10010, 0b10001, 0b10001, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b00110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b01110, 0b10000, 0b11110, 0b10001, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00001, 0b01110],
        ' ' => [0; 7],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ':' => [0, 0b00100, 0, 0, 0b00100, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ',' => [0, 0, 0, 0, 0b00110, 0b00110, 0b00100],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        _ => return None,
    };
    Some(rows)
}

#[derive(Debug, Clone, Copy)]
pub struct TextLayout {
    pub pixel_size: u32,
    pub letter_spacing: u32,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            pixel_size: 22,
            letter_spacing: 1,
        }
    }
}

/// Draws `text` centred on `canvas`. Glyph pixels falling off the canvas
/// are clipped.
pub fn draw_centered(canvas: &mut RgbaImage, text: &str, color: Rgba<u8>, layout: TextLayout) {
    let glyph_w = i64::from(GLYPH_WIDTH * layout.pixel_size);
    let glyph_h = i64::from(GLYPH_HEIGHT * layout.pixel_size);
    let spacing = i64::from(layout.letter_spacing * layout.pixel_size);
    let chars = text.chars().count() as i64;
    let text_width = (chars * (glyph_w + spacing) - spacing).max(1);
    let width = i64::from(canvas.width());
    let height = i64::from(canvas.height());
    let offset_x = (width - text_width).div_euclid(2);
    let offset_y = (height - glyph_h).div_euclid(2);
    let cell = i64::from(layout.pixel_size);

    let mut cursor_x = offset_x;
    for ch in text.chars() {
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let start_x = cursor_x + i64::from(col) * cell;
                let start_y = offset_y + row as i64 * cell;
                for y in start_y.max(0)..(start_y + cell).min(height) {
                    for x in start_x.max(0)..(start_x + cell).min(width) {
                        canvas.put_pixel(x as u32, y as u32, color);
                    }
                }
            }
        }
        cursor_x += glyph_w + spacing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_and_unknown_glyphs_fall_back() {
        assert_eq!(glyph('a'), glyph('A'));
        assert_eq!(glyph('~'), glyph('?'));
    }

    #[test]
    fn draws_within_bounds_and_clips_long_text() {
        let white = Rgba([255, 255, 255, 255]);
        let black = Rgba([0, 0, 0, 255]);
        let mut canvas = RgbaImage::from_pixel(64, 64, white);
        draw_centered(
            &mut canvas,
            "I",
            black,
            TextLayout {
                pixel_size: 2,
                letter_spacing: 1,
            },
        );
        // Top bar of 'I' spans the whole 10px glyph width at the centre.
        assert_eq!(*canvas.get_pixel(27, 25), black);
        assert_eq!(*canvas.get_pixel(0, 0), white);

        let mut small = RgbaImage::from_pixel(16, 16, white);
        draw_centered(&mut small, "WIDE TEXT HERE", black, TextLayout::default());
        assert_eq!(small.width(), 16);
    }
}
