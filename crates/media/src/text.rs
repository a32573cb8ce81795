//! Text stickers: word wrapping, font sizing and rasterization.

use std::path::{Path, PathBuf};

use {
    ab_glyph::{Font, FontVec, PxScale, ScaleFont, point},
    image::{Rgba, RgbaImage},
    tracing::debug,
};

use crate::error::{Context, Error, Result};

/// Assumed average glyph advance, in tenths of the font size.
pub const AVG_GLYPH_WIDTH_TENTHS: u64 = 6;
/// Line count above which the font shrinks.
pub const MAX_LINES: usize = 5;
/// Canvas size the configured font size refers to.
pub const REFERENCE_SIZE: u32 = 512;

const LINE_HEIGHT: f32 = 1.2;
/// Fraction of the canvas usable for text.
const TEXT_AREA: f32 = 0.9;
const TEXT_AREA_TENTHS: u64 = 9;
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Fonts tried in order when none is configured.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Wrapped lines and the font size to draw them at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLayout {
    pub lines: Vec<String>,
    pub font_size: u32,
}

/// Characters that fit on one line at `font_size` on a `width`-pixel canvas.
#[must_use]
pub fn max_chars_per_line(width: u32, font_size: u32) -> usize {
    let usable = u64::from(width) * TEXT_AREA_TENTHS;
    let glyph = u64::from(font_size.max(1)) * AVG_GLYPH_WIDTH_TENTHS;
    usize::try_from(usable / glyph).unwrap_or(usize::MAX).max(1)
}

/// `font_size` (given for a [`REFERENCE_SIZE`] canvas) scaled to `size`.
#[must_use]
pub fn scale_font_size(font_size: u32, size: u32) -> u32 {
    let scaled = u64::from(font_size) * u64::from(size) / u64::from(REFERENCE_SIZE);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Greedy word wrap. Words longer than a line are split.
#[must_use]
pub fn wrap_words(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 {
            word.len()
        } else {
            current_len + 1 + word.len()
        };
        if needed > max_chars {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Wrap `text` for a `size`-pixel canvas and pick the font size.
///
/// More than [`MAX_LINES`] lines shrink the font in proportion to the line
/// count, never below `min_font_size`; the result is further capped so every
/// line fits vertically.
#[must_use]
pub fn layout_text(text: &str, size: u32, font_size: u32, min_font_size: u32) -> TextLayout {
    let lines = wrap_words(text, max_chars_per_line(size, font_size));
    let count = lines.len().max(1);

    let mut fitted = font_size;
    if count > MAX_LINES {
        let proportional = font_size as usize * MAX_LINES / count;
        fitted = u32::try_from(proportional).unwrap_or(font_size);
    }
    let vertical = (size as f32 * TEXT_AREA / (count as f32 * LINE_HEIGHT)).floor() as u32;
    fitted = fitted.min(vertical).max(min_font_size);

    TextLayout {
        lines,
        font_size: fitted,
    }
}

/// Load a font from `path`, or the first installed system font.
pub fn load_font(path: Option<&Path>) -> Result<FontVec> {
    let candidate = match path {
        Some(path) => path.to_path_buf(),
        None => find_system_font().ok_or_else(|| {
            Error::Message("no usable font found; set text.font_path".to_string())
        })?,
    };
    let bytes = std::fs::read(&candidate)
        .with_context(|| format!("failed to read font {}", candidate.display()))?;
    debug!(path = %candidate.display(), "loaded font");
    FontVec::try_from_vec(bytes)
        .with_context(|| format!("invalid font file {}", candidate.display()))
}

#[must_use]
pub fn find_system_font() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Rasterizes centered black text on a white square.
pub struct TextRenderer {
    font: FontVec,
    font_size: u32,
    min_font_size: u32,
}

impl TextRenderer {
    #[must_use]
    pub fn new(font: FontVec, font_size: u32, min_font_size: u32) -> Self {
        Self {
            font,
            font_size,
            min_font_size,
        }
    }

    /// Layout for `text` on a `size` canvas; the configured font size refers
    /// to a [`REFERENCE_SIZE`] canvas and scales with it.
    #[must_use]
    pub fn layout(&self, text: &str, size: u32) -> TextLayout {
        let scaled = scale_font_size(self.font_size, size).max(self.min_font_size);
        layout_text(text, size, scaled, self.min_font_size)
    }

    #[must_use]
    pub fn render(&self, text: &str, size: u32) -> RgbaImage {
        let layout = self.layout(text, size);
        let mut canvas = RgbaImage::from_pixel(size, size, BACKGROUND);

        let scale = PxScale::from(layout.font_size as f32);
        let scaled = self.font.as_scaled(scale);
        let line_height = layout.font_size as f32 * LINE_HEIGHT;
        let block_height = line_height * layout.lines.len() as f32;
        let top = (size as f32 - block_height) / 2.0;
        // Center the glyph box inside each line slot.
        let inset = (line_height - (scaled.ascent() - scaled.descent())) / 2.0;

        for (i, line) in layout.lines.iter().enumerate() {
            let width = line_width(&scaled, line);
            let mut x = ((size as f32 - width) / 2.0).max(0.0);
            let baseline = top + i as f32 * line_height + inset + scaled.ascent();
            let mut previous = None;

            for ch in line.chars() {
                let id = scaled.glyph_id(ch);
                if let Some(prev) = previous {
                    x += scaled.kern(prev, id);
                }
                let glyph = id.with_scale_and_position(scale, point(x, baseline));
                if let Some(outlined) = self.font.outline_glyph(glyph) {
                    let bounds = outlined.px_bounds();
                    outlined.draw(|gx, gy, coverage| {
                        let px = bounds.min.x as i64 + i64::from(gx);
                        let py = bounds.min.y as i64 + i64::from(gy);
                        if let (Ok(px), Ok(py)) = (u32::try_from(px), u32::try_from(py))
                            && px < size
                            && py < size
                        {
                            let pixel = canvas.get_pixel_mut(px, py);
                            let ink = 1.0 - coverage.clamp(0.0, 1.0);
                            for channel in &mut pixel.0[..3] {
                                *channel = (f32::from(*channel) * ink) as u8;
                            }
                        }
                    });
                }
                x += scaled.h_advance(id);
                previous = Some(id);
            }
        }
        canvas
    }
}

fn line_width<F: Font, SF: ScaleFont<F>>(scaled: &SF, line: &str) -> f32 {
    let mut width = 0.0;
    let mut previous = None;
    for ch in line.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chars_per_line_estimate() {
        // 512 * 0.9 / (48 * 0.6) = 16
        assert_eq!(max_chars_per_line(512, 48), 16);
        assert_eq!(max_chars_per_line(10, 500), 1);
        assert_eq!(max_chars_per_line(256, 24), 16);
        assert_eq!(max_chars_per_line(300, 50), 9);
    }

    #[test]
    fn font_size_scales_with_canvas() {
        assert_eq!(scale_font_size(48, 512), 48);
        assert_eq!(scale_font_size(48, 256), 24);
        assert_eq!(scale_font_size(u32::MAX, 512), u32::MAX);
        assert_eq!(scale_font_size(u32::MAX, 128), u32::MAX / 4);
    }

    #[test]
    fn huge_font_size_lays_out_without_overflow() {
        let layout = layout_text("oi", 512, scale_font_size(u32::MAX, 512), 16);
        assert_eq!(layout.lines, vec!["o", "i"]);
        assert!(layout.font_size >= 16);
    }

    #[test]
    fn wraps_greedily() {
        let lines = wrap_words("olá mundo das figurinhas", 10);
        assert_eq!(lines, vec!["olá mundo", "das", "figurinhas"]);
    }

    #[test]
    fn splits_overlong_words() {
        let lines = wrap_words("abcdefghij k", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij k"]);
    }

    #[test]
    fn whitespace_only_has_no_lines() {
        assert!(wrap_words("  \n\t ", 10).is_empty());
    }

    #[test]
    fn short_text_keeps_default_font() {
        let layout = layout_text("oi", 512, 48, 16);
        assert_eq!(layout.lines, vec!["oi"]);
        assert_eq!(layout.font_size, 48);
    }

    #[test]
    fn more_than_five_lines_shrinks_font() {
        let text = "palavra ".repeat(20);
        let layout = layout_text(&text, 512, 48, 16);
        assert!(layout.lines.len() > MAX_LINES);
        assert!(layout.font_size < 48);
        assert!(layout.font_size >= 16);
    }

    #[test]
    fn shrink_is_floored() {
        let text = "a ".repeat(2_000);
        let layout = layout_text(&text, 512, 48, 16);
        assert_eq!(layout.font_size, 16);
    }

    #[test]
    fn renders_when_a_font_is_installed() {
        let Ok(font) = load_font(None) else {
            eprintln!("skipping: no system font");
            return;
        };
        let renderer = TextRenderer::new(font, 48, 16);
        let img = renderer.render("Olá", 256);
        assert_eq!(img.dimensions(), (256, 256));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert!(img.pixels().any(|p| p.0[0] < 128), "no ink drawn");
    }

    #[test]
    fn missing_font_path_fails() {
        assert!(load_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());
    }
}
