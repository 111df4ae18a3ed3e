//! Scalable 3x5 bitmap font.

use crate::display::canvas::{Bitmap, Size};

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
/// Glyph cell including one unit of spacing on the right and below.
const CELL_WIDTH: u32 = GLYPH_WIDTH + 1;
const CELL_HEIGHT: u32 = GLYPH_HEIGHT + 1;

/// Text metrics and rasterization used by layout.
pub trait Font: Send + Sync {
    fn text_size(&self, text: &str) -> Size;

    fn line_height(&self) -> u32 {
        self.text_size("Tg").height
    }

    fn rasterize(&self, text: &str) -> Bitmap;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapFont {
    scale: u32,
}

impl BitmapFont {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
        }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl Font for BitmapFont {
    fn text_size(&self, text: &str) -> Size {
        let chars = text.chars().count() as u32;
        Size::new(chars * CELL_WIDTH * self.scale, CELL_HEIGHT * self.scale)
    }

    fn rasterize(&self, text: &str) -> Bitmap {
        let size = self.text_size(text);
        let mut bitmap = Bitmap::blank(size.width, size.height);
        for (index, ch) in text.chars().enumerate() {
            let left = index as u32 * CELL_WIDTH * self.scale;
            for (row, bits) in glyph(ch).iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    for dy in 0..self.scale {
                        let y = row as u32 * self.scale + dy;
                        let start = (y * size.width + left + col * self.scale) as usize;
                        bitmap.coverage[start..start + self.scale as usize].fill(255);
                    }
                }
            }
        }
        bitmap
    }
}

fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_lowercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'a' => [0b111, 0b101, 0b111, 0b101, 0b101],
        'b' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'c' => [0b111, 0b100, 0b100, 0b100, 0b111],
        'd' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'e' => [0b111, 0b100, 0b111, 0b100, 0b111],
        'f' => [0b111, 0b100, 0b111, 0b100, 0b100],
        'g' => [0b111, 0b100, 0b101, 0b101, 0b111],
        'h' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'i' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'j' => [0b001, 0b001, 0b001, 0b101, 0b111],
        'k' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'l' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'm' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'n' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'o' => [0b111, 0b101, 0b101, 0b101, 0b111],
        'p' => [0b111, 0b101, 0b111, 0b100, 0b100],
        'q' => [0b111, 0b101, 0b101, 0b111, 0b001],
        'r' => [0b110, 0b101, 0b110, 0b101, 0b101],
        's' => [0b111, 0b100, 0b111, 0b001, 0b111],
        't' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'u' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'v' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'w' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'x' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'y' => [0b101, 0b101, 0b111, 0b010, 0b010],
        'z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        '!' => [0b010, 0b010, 0b010, 0b000, 0b010],
        '?' => [0b111, 0b001, 0b011, 0b000, 0b010],
        '\'' => [0b010, 0b010, 0b000, 0b000, 0b000],
        '"' => [0b101, 0b101, 0b000, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        ';' => [0b000, 0b010, 0b000, 0b010, 0b100],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '(' => [0b001, 0b010, 0b010, 0b010, 0b001],
        ')' => [0b100, 0b010, 0b010, 0b010, 0b100],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        ' ' => [0b000; 5],
        _ => [0b000, 0b000, 0b010, 0b000, 0b000],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_scale_with_character_count() {
        let font = BitmapFont::new(2);
        assert_eq!(font.text_size("boo"), Size::new(24, 12));
        assert_eq!(font.text_size(""), Size::new(0, 12));
        assert_eq!(font.line_height(), 12);
    }

    #[test]
    fn rasterized_glyph_matches_pattern() {
        let font = BitmapFont::new(1);
        let bitmap = font.rasterize("l");

        assert_eq!((bitmap.width, bitmap.height), (4, 6));
        assert_eq!(bitmap.get(0, 0), 255);
        assert_eq!(bitmap.get(1, 0), 0);
        assert_eq!(bitmap.get(2, 4), 255);
        // spacing column and row stay empty
        assert_eq!(bitmap.get(3, 4), 0);
        assert_eq!(bitmap.get(0, 5), 0);
    }

    #[test]
    fn scaled_glyph_fills_blocks() {
        let font = BitmapFont::new(3);
        let bitmap = font.rasterize("i");
        for y in 0..3 {
            for x in 0..9 {
                assert_eq!(bitmap.get(x, y), 255, "top bar pixel ({x},{y})");
            }
        }
        assert_eq!(bitmap.get(0, 3), 0);
    }
}
