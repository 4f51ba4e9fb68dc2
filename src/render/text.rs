use anyhow::{Context, Result};
use fontdue::{Font, FontSettings};
use std::path::Path;

/// Rasterizes tick labels onto RGBA frames.
pub struct TextOverlay {
    font: Font,
    font_size: f32,
}

impl TextOverlay {
    pub fn from_file(path: &Path, font_size: f32) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font {}", path.display()))?;
        Self::from_bytes(&bytes, font_size)
    }

    pub fn from_bytes(bytes: &[u8], font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| anyhow::anyhow!("Failed to parse font: {}", e))?;
        Ok(Self { font, font_size })
    }

    pub fn line_height(&self) -> u32 {
        self.font_size.ceil() as u32
    }

    /// Alpha-blend `text` with its top-left corner at `(x, y)`, clipped to the frame.
    #[allow(clippy::too_many_arguments)]
    pub fn composite(
        &self,
        pixels: &mut [u8],
        width: u32,
        height: u32,
        text: &str,
        x: i32,
        y: i32,
        color: [u8; 4],
    ) {
        let mut cursor_x = x;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, self.font_size);
            let glyph_y = y + self.font_size as i32 - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx];
                    if coverage == 0 {
                        continue;
                    }
                    let px = cursor_x + metrics.xmin + gx as i32;
                    let py = glyph_y + gy as i32;
                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }
                    let idx = ((py as u32 * width + px as u32) * 4) as usize;
                    let a = coverage as f32 / 255.0 * (color[3] as f32 / 255.0);
                    blend(&mut pixels[idx..idx + 4], color, a);
                }
            }

            cursor_x += metrics.advance_width.round() as i32;
        }
    }

    pub fn measure_width(&self, text: &str) -> u32 {
        let width: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        width.ceil() as u32
    }
}

/// Source-over blend of `color` at opacity `a` into one RGBA pixel.
pub fn blend(pixel: &mut [u8], color: [u8; 4], a: f32) {
    let a = a.clamp(0.0, 1.0);
    let inv_a = 1.0 - a;
    for c in 0..3 {
        pixel[c] = (color[c] as f32 * a + pixel[c] as f32 * inv_a).round() as u8;
    }
    pixel[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_is_weighted_and_opaque() {
        let mut px = [0u8, 100, 200, 10];
        blend(&mut px, [255, 255, 255, 255], 0.5);
        assert_eq!(px, [128, 178, 228, 255]);

        let mut px = [10u8, 20, 30, 255];
        blend(&mut px, [255, 0, 0, 255], 0.0);
        assert_eq!(px, [10, 20, 30, 255]);
    }

    #[test]
    fn garbage_font_is_an_error() {
        assert!(TextOverlay::from_bytes(b"not a font", 12.0).is_err());
        assert!(TextOverlay::from_file(Path::new("/nonexistent/font.ttf"), 12.0).is_err());
    }
}
