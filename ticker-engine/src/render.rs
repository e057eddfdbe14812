//! Pixel plumbing between the engine and its two output collaborators.
//!
//! A [`TextRenderer`] turns `(text, colour, row height, font)` into a [`Bitmap`]; the engine
//! composes bitmaps into a fixed-size [`FrameBuffer`] which a [`PanelDriver`] pushes to the
//! hardware once per tick.

use crate::error::PanelError;
use derive_more::Constructor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Constructor)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    pub const WHITE: Rgb = Rgb { r: 220, g: 220, b: 220 };
    pub const YELLOW: Rgb = Rgb { r: 255, g: 255, b: 0 };
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    pub const GREEN: Rgb = Rgb { r: 0, g: 255, b: 0 };
    pub const CYAN: Rgb = Rgb { r: 100, g: 180, b: 255 };
    pub const BLUE: Rgb = Rgb { r: 80, g: 160, b: 255 };
    pub const MAGENTA: Rgb = Rgb { r: 255, g: 80, b: 180 };
    pub const ORANGE: Rgb = Rgb { r: 255, g: 165, b: 0 };
    pub const GREY: Rgb = Rgb { r: 140, g: 140, b: 140 };
    /// Status dot colour on game days.
    pub const GAME_DAY: Rgb = Rgb { r: 0, g: 150, b: 255 };

    pub fn is_black(&self) -> bool {
        *self == Rgb::BLACK
    }

    /// Multiply every channel by `scale`, truncating.
    pub fn scaled(&self, scale: f64) -> Rgb {
        let channel = |value: u8| (f64::from(value) * scale) as u8;
        Rgb::new(channel(self.r), channel(self.g), channel(self.b))
    }
}

/// Resolve a named colour; unknown names fall back to yellow.
pub fn parse_color(name: &str) -> Rgb {
    match name.trim().to_ascii_lowercase().as_str() {
        "white" => Rgb::WHITE,
        "yellow" => Rgb::YELLOW,
        "red" => Rgb::RED,
        "green" => Rgb::GREEN,
        "cyan" => Rgb::CYAN,
        "blue" => Rgb::BLUE,
        "magenta" => Rgb::MAGENTA,
        "orange" => Rgb::ORANGE,
        "grey" | "gray" => Rgb::GREY,
        "black" => Rgb::BLACK,
        _ => Rgb::YELLOW,
    }
}

/// Font family requested from the [`TextRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Font {
    /// Ticker rows
    Row,
    /// Full-height clock, maintenance and alert text
    Big,
    /// Full-height scoreboard
    Scoreboard,
}

/// Rectangular block of pixels. Black pixels are transparent when blitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgb>,
}

impl Bitmap {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width * height],
        }
    }

    pub fn set(&mut self, x: usize, y: usize, color: Rgb) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgb> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }
}

/// Rasterises text. Implementations must return a bitmap exactly `row_height` tall.
pub trait TextRenderer: Send + Sync {
    fn render(&self, text: &str, color: Rgb, row_height: usize, font: Font) -> Bitmap;
}

/// Consumes finished frames. Initialisation failure is fatal for the process.
pub trait PanelDriver: Send {
    fn init(&mut self, width: usize, height: usize) -> Result<(), PanelError>;

    fn write(&mut self, frame: &FrameBuffer) -> Result<(), PanelError>;
}

/// Fixed-size RGB frame handed to the [`PanelDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
}

impl FrameBuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgb::BLACK; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(Rgb::BLACK);
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgb> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    /// Resize the frame, clearing it. No-op when the size is unchanged.
    pub fn resize(&mut self, width: usize, height: usize) {
        if (width, height) != (self.width, self.height) {
            *self = Self::new(width, height);
        }
    }

    /// Draw `bitmap` with its top-left corner at `(x, y)`, clipping to the frame.
    pub fn blit(&mut self, bitmap: &Bitmap, x: i32, y: i32) {
        for row in 0..bitmap.height {
            let fy = y + row as i32;
            if fy < 0 || fy >= self.height as i32 {
                continue;
            }
            for col in 0..bitmap.width {
                let fx = x + col as i32;
                if fx < 0 || fx >= self.width as i32 {
                    continue;
                }
                let color = bitmap.pixels[row * bitmap.width + col];
                if !color.is_black() {
                    self.pixels[fy as usize * self.width + fx as usize] = color;
                }
            }
        }
    }

    /// Draw `bitmap` centred in the frame.
    pub fn blit_centered(&mut self, bitmap: &Bitmap) {
        let x = (self.width as i32 - bitmap.width as i32).max(0) / 2;
        let y = (self.height as i32 - bitmap.height as i32).max(0) / 2;
        self.blit(bitmap, x, y);
    }

    /// Draw `segments` left to right starting at `x`; returns their total width (at least 1).
    pub fn blit_run(&mut self, segments: &[Bitmap], x: i32, y: i32) -> usize {
        let mut cursor = x;
        for segment in segments {
            let width = segment.width as i32;
            if cursor > -width && cursor < self.width as i32 {
                self.blit(segment, cursor, y);
            }
            cursor += width;
        }
        segments.iter().map(|segment| segment.width).sum::<usize>().max(1)
    }

    /// Multiply every pixel by `scale`, clamped to `[0.01, 1.0]`.
    pub fn dim(&mut self, scale: f64) {
        let scale = scale.clamp(crate::schedule::MIN_DIM_SCALE, 1.0);
        if scale >= 0.999 {
            return;
        }
        for pixel in &mut self.pixels {
            *pixel = pixel.scaled(scale);
        }
    }

    /// Packed `RGBRGB...` bytes, row-major.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|pixel| [pixel.r, pixel.g, pixel.b])
            .collect()
    }
}

/// Fixed-pitch renderer drawing every visible character as a solid cell.
///
/// Used for previews and tests where exact glyph shapes do not matter, only geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Constructor)]
pub struct BlockTextRenderer {
    pub cell_width: usize,
}

impl Default for BlockTextRenderer {
    fn default() -> Self {
        Self { cell_width: 6 }
    }
}

impl TextRenderer for BlockTextRenderer {
    fn render(&self, text: &str, color: Rgb, row_height: usize, font: Font) -> Bitmap {
        let cell = match font {
            Font::Row => self.cell_width,
            Font::Big | Font::Scoreboard => self.cell_width * 2,
        }
        .max(1);
        let glyphs = text.chars().count();
        let mut bitmap = Bitmap::new(glyphs * cell, row_height);

        for (index, glyph) in text.chars().enumerate() {
            if glyph.is_whitespace() {
                continue;
            }
            // One column of spacing on the right, one row of padding top and bottom
            for x in index * cell..(index + 1) * cell - 1 {
                for y in 1..row_height.saturating_sub(1) {
                    bitmap.set(x, y, color);
                }
            }
        }
        bitmap
    }
}
