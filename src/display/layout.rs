//! Greedy text wrapping and placement of a phrase on the viewport.
//!
//! Layout is a pure function of the text, the available area and the font;
//! timing and drawing live in [`crate::display::fade`].

use crate::display::canvas::{Color, Position, RenderedLine, Size};
use crate::display::font::Font;
use serde::Deserialize;

/// Fraction of the viewport kept free around wrapped text.
pub const DEFAULT_MARGIN: f64 = 0.10;
/// Inset of the safe area used for random placement.
pub const PLACEMENT_INSET: f64 = 0.05;
pub const DEFAULT_LINE_SPACING: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutOptions {
    pub margin: f64,
    /// Extra pixels between consecutive lines (may be negative).
    pub line_spacing: i32,
    pub color: Color,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            margin: DEFAULT_MARGIN,
            line_spacing: DEFAULT_LINE_SPACING,
            color: Color::WHITE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Centered,
    #[default]
    Random,
}

/// Wrapped lines of one phrase plus their bounding box.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextBlock {
    pub lines: Vec<RenderedLine>,
    pub size: Size,
}

pub fn layout_text(
    text: &str,
    available: Size,
    font: &dyn Font,
    options: &LayoutOptions,
) -> TextBlock {
    let usable = 1.0 - options.margin.clamp(0.0, 1.0);
    let max_width = (f64::from(available.width) * usable) as u32;
    let max_height = (f64::from(available.height) * usable) as i64;
    let line_height = font.line_height();
    let advance = (line_height as i32 + options.line_spacing).max(1);

    let mut lines = Vec::new();
    let mut y: i32 = 0;
    let mut widest = 0;

    'logical: for logical in text.lines() {
        if logical.is_empty() {
            if i64::from(y) + i64::from(line_height) > max_height {
                break;
            }
            lines.push(render(font, "", y, options.color));
            y += advance;
            continue;
        }

        let mut rest = logical;
        while !rest.is_empty() {
            if i64::from(y) + i64::from(line_height) > max_height {
                break 'logical;
            }
            let split = wrap_point(rest, max_width, font);
            let (chunk, tail) = rest.split_at(split);
            let line = render(font, chunk.trim_end(), y, options.color);
            widest = widest.max(line.width());
            lines.push(line);
            y += advance;
            rest = tail;
        }
    }

    let height = lines
        .last()
        .map(|line| (line.offset_y + line_height as i32).max(0) as u32)
        .unwrap_or(0);
    TextBlock {
        lines,
        size: Size::new(widest, height),
    }
}

fn render(font: &dyn Font, text: &str, offset_y: i32, color: Color) -> RenderedLine {
    RenderedLine {
        text: text.to_string(),
        bitmap: font.rasterize(text),
        offset_y,
        color,
    }
}

/// Byte index at which to break `line`. Always consumes at least one character.
fn wrap_point(line: &str, max_width: u32, font: &dyn Font) -> usize {
    let mut ends = line
        .char_indices()
        .map(|(index, ch)| index + ch.len_utf8());
    let Some(first_end) = ends.next() else {
        return 0;
    };

    let mut fit_end = first_end;
    let mut overflow_end = None;
    for end in ends {
        if font.text_size(&line[..end]).width <= max_width {
            fit_end = end;
        } else {
            overflow_end = Some(end);
            break;
        }
    }
    if font.text_size(&line[..fit_end]).width > max_width && fit_end < line.len() {
        // A single character wider than the line still gets a line of its own.
        return fit_end;
    }

    let Some(overflow_end) = overflow_end else {
        return fit_end;
    };
    // Prefer breaking just after the last space, including the character
    // that did not fit in case it is the space itself.
    match line[..overflow_end].rfind(' ') {
        Some(space) if space > 0 => space + 1,
        _ => fit_end,
    }
}

/// Top-left corner for a block of `block` size on a `viewport`.
pub fn place(block: Size, viewport: Size, placement: Placement, rng: &mut fastrand::Rng) -> Position {
    match placement {
        Placement::Centered => Position::new(
            viewport.width as i32 / 2 - block.width as i32 / 2,
            viewport.height as i32 / 2 - block.height as i32 / 2,
        ),
        Placement::Random => Position::new(
            random_axis(block.width, viewport.width, rng),
            random_axis(block.height, viewport.height, rng),
        ),
    }
}

/// Uniform within the inset safe area; pinned to the inset when the block does not fit.
fn random_axis(extent: u32, available: u32, rng: &mut fastrand::Rng) -> i32 {
    let inset = (f64::from(available) * PLACEMENT_INSET) as i32;
    let min = inset;
    let max = available as i32 - inset - extent as i32;
    if max < min { min } else { rng.i32(min..=max) }
}
