use crate::error::AppError;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const GRAY: Self = Self::rgb(127, 127, 127);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_argb(self) -> u32 {
        0xFF00_0000 | (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b)
    }

    fn from_argb(argb: u32) -> Self {
        Self::rgb((argb >> 16) as u8, (argb >> 8) as u8, argb as u8)
    }

    /// Mix `self` toward `other`; `t` = 0.0 keeps `self`, 1.0 gives `other`.
    pub fn blend(self, other: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        let lerp = |a: u8, b: u8| (f64::from(a) * (1.0 - t) + f64::from(b) * t).round() as u8;
        Self::rgb(lerp(self.r, other.r), lerp(self.g, other.g), lerp(self.b, other.b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 8-bit coverage mask, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

impl Bitmap {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.coverage[(y * self.width + x) as usize]
    }
}

/// One wrapped line of a phrase, rasterized once and redrawn every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLine {
    pub text: String,
    pub bitmap: Bitmap,
    /// Distance from the top of the text block to the top of this line.
    pub offset_y: i32,
    pub color: Color,
}

impl RenderedLine {
    pub fn width(&self) -> u32 {
        self.bitmap.width
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height
    }
}

/// Display surface collaborator. Only the active fade writes to it.
pub trait Canvas: Send {
    fn viewport_size(&self) -> Size;
    fn clear(&mut self, color: Color);
    /// Draw `line` relative to the text block origin at `alpha` opacity.
    fn draw_line(&mut self, line: &RenderedLine, origin: Position, alpha: f64);
    fn present(&mut self) -> Result<(), AppError>;
}

pub type SharedCanvas = Arc<Mutex<dyn Canvas>>;

/// Software ARGB framebuffer. Frames are optionally handed to a presenter
/// (such as a window) through a bounded channel, which paces redraws.
pub struct FramebufferCanvas {
    size: Size,
    pixels: Vec<u32>,
    frames: u64,
    sink: Option<SyncSender<Vec<u32>>>,
}

impl FramebufferCanvas {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            pixels: vec![Color::BLACK.to_argb(); (size.width * size.height) as usize],
            frames: 0,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: SyncSender<Vec<u32>>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        Some(self.pixels[(y * self.size.width + x) as usize])
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

impl Canvas for FramebufferCanvas {
    fn viewport_size(&self) -> Size {
        self.size
    }

    fn clear(&mut self, color: Color) {
        self.pixels.fill(color.to_argb());
    }

    fn draw_line(&mut self, line: &RenderedLine, origin: Position, alpha: f64) {
        let alpha = alpha.clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return;
        }
        let top = origin.y + line.offset_y;
        for row in 0..line.bitmap.height {
            let y = top + row as i32;
            if y < 0 || y >= self.size.height as i32 {
                continue;
            }
            for col in 0..line.bitmap.width {
                let x = origin.x + col as i32;
                if x < 0 || x >= self.size.width as i32 {
                    continue;
                }
                let coverage = line.bitmap.get(col, row);
                if coverage == 0 {
                    continue;
                }
                let index = (y as u32 * self.size.width + x as u32) as usize;
                let under = Color::from_argb(self.pixels[index]);
                let weight = alpha * f64::from(coverage) / 255.0;
                self.pixels[index] = under.blend(line.color, weight).to_argb();
            }
        }
    }

    fn present(&mut self) -> Result<(), AppError> {
        self.frames += 1;
        if let Some(sink) = &self.sink {
            sink.send(self.pixels.clone())
                .map_err(|_| AppError::Display("frame receiver closed".to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub text: String,
    pub origin: Position,
    pub alpha: f64,
}

/// Canvas that records what would have been drawn.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    size: Size,
    pub draws: Vec<DrawCall>,
    pub clears: usize,
    pub frames: usize,
}

impl RecordingCanvas {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Distinct phrases in the order they appeared, collapsing repeats
    /// across consecutive frames.
    pub fn shown_texts(&self) -> Vec<String> {
        let mut shown: Vec<String> = Vec::new();
        for draw in &self.draws {
            if shown.last() != Some(&draw.text) {
                shown.push(draw.text.clone());
            }
        }
        shown
    }

    pub fn alphas(&self) -> Vec<f64> {
        self.draws.iter().map(|draw| draw.alpha).collect()
    }
}

impl Canvas for RecordingCanvas {
    fn viewport_size(&self) -> Size {
        self.size
    }

    fn clear(&mut self, _color: Color) {
        self.clears += 1;
    }

    fn draw_line(&mut self, line: &RenderedLine, origin: Position, alpha: f64) {
        self.draws.push(DrawCall {
            text: line.text.clone(),
            origin,
            alpha,
        });
    }

    fn present(&mut self) -> Result<(), AppError> {
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_line(width: u32, height: u32) -> RenderedLine {
        RenderedLine {
            text: "x".to_string(),
            bitmap: Bitmap {
                width,
                height,
                coverage: vec![255; (width * height) as usize],
            },
            offset_y: 0,
            color: Color::WHITE,
        }
    }

    #[test]
    fn draw_line_scales_with_alpha() {
        let mut canvas = FramebufferCanvas::new(Size::new(4, 4));
        canvas.clear(Color::BLACK);

        canvas.draw_line(&solid_line(1, 1), Position::new(1, 1), 0.5);

        assert_eq!(canvas.pixel(1, 1), Some(Color::rgb(128, 128, 128).to_argb()));
        assert_eq!(canvas.pixel(0, 0), Some(Color::BLACK.to_argb()));
    }

    #[test]
    fn draw_line_clips_to_viewport() {
        let mut canvas = FramebufferCanvas::new(Size::new(3, 3));

        canvas.draw_line(&solid_line(5, 5), Position::new(-2, 1), 1.0);

        assert_eq!(canvas.pixel(0, 1), Some(Color::WHITE.to_argb()));
        assert_eq!(canvas.pixel(2, 2), Some(Color::WHITE.to_argb()));
        assert_eq!(canvas.pixel(0, 0), Some(Color::BLACK.to_argb()));
    }

    #[test]
    fn present_forwards_frames_to_sink() -> Result<(), AppError> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let mut canvas = FramebufferCanvas::new(Size::new(2, 1)).with_sink(tx);

        canvas.present()?;

        assert_eq!(rx.try_recv().map(|frame| frame.len()), Ok(2));
        assert_eq!(canvas.frames_presented(), 1);
        drop(rx);
        assert!(matches!(canvas.present(), Err(AppError::Display(_))));
        Ok(())
    }

    #[test]
    fn shown_texts_collapses_consecutive_frames() {
        let mut canvas = RecordingCanvas::new(Size::new(10, 10));
        for text in ["a", "a", "b", "b", "a"] {
            let mut line = solid_line(1, 1);
            line.text = text.to_string();
            canvas.draw_line(&line, Position::default(), 1.0);
        }
        assert_eq!(canvas.shown_texts(), vec!["a", "b", "a"]);
    }
}
