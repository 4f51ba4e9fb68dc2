//! CPU compositing of the waveform strip and time axis onto finished frames.

use crate::timeline::Tick;

use super::text::{blend, TextOverlay};

pub const WAVEFORM_BACKGROUND: [u8; 4] = [12, 14, 20, 255];
pub const WAVEFORM_COLOR: [u8; 4] = [120, 200, 255, 255];
pub const TICK_COLOR: [u8; 4] = [255, 255, 255, 70];
pub const DAY_TICK_COLOR: [u8; 4] = [255, 220, 120, 160];
pub const LABEL_COLOR: [u8; 4] = [255, 255, 255, 220];

/// Copy a `width`-wide RGBA image into `frame` starting at row `top`.
pub fn blit_rows(frame: &mut [u8], width: u32, top: u32, image: &[u8]) {
    let start = (top * width * 4) as usize;
    let end = (start + image.len()).min(frame.len());
    frame[start..end].copy_from_slice(&image[..end - start]);
}

/// Fill rows `top..top + height` with a solid colour.
pub fn fill_rows(frame: &mut [u8], width: u32, top: u32, height: u32, color: [u8; 4]) {
    let start = (top * width * 4) as usize;
    let end = (((top + height) * width * 4) as usize).min(frame.len());
    for px in frame[start..end].chunks_exact_mut(4) {
        px.copy_from_slice(&color);
    }
}

/// Draw a min/max envelope in the band `top..top + height`. Amplitudes in
/// `[-1, 1]` map onto the band; anything louder is clipped.
pub fn draw_envelope(
    frame: &mut [u8],
    width: u32,
    top: u32,
    height: u32,
    mins: &[f32],
    maxs: &[f32],
    color: [u8; 4],
) {
    if height == 0 {
        return;
    }
    let mid = top as f32 + height as f32 / 2.0;
    let half = height as f32 / 2.0;
    let bottom = top + height - 1;
    let to_row = |v: f32| ((mid - v.clamp(-1.0, 1.0) * half).round() as u32).clamp(top, bottom);

    for (x, (&lo, &hi)) in mins.iter().zip(maxs).enumerate().take(width as usize) {
        let (y0, y1) = (to_row(hi), to_row(lo));
        for y in y0.min(y1)..=y0.max(y1) {
            let idx = ((y * width + x as u32) * 4) as usize;
            frame[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

/// Vertical tick lines over the whole frame, labelled at `label_row` when a
/// font is available. Labels that would run off the right edge are dropped.
pub fn draw_ticks(
    frame: &mut [u8],
    width: u32,
    height: u32,
    ticks: &[Tick],
    text: Option<&TextOverlay>,
    label_row: u32,
) {
    for tick in ticks {
        if !(0.0..width as f64).contains(&tick.x) {
            continue;
        }
        let x = tick.x as u32;
        let color = if tick.is_day_boundary { DAY_TICK_COLOR } else { TICK_COLOR };
        let a = color[3] as f32 / 255.0;
        for y in 0..height {
            let idx = ((y * width + x) * 4) as usize;
            blend(&mut frame[idx..idx + 4], color, a);
        }

        if let Some(text) = text {
            if x + 3 + text.measure_width(&tick.label) > width {
                continue;
            }
            text.composite(frame, width, height, &tick.label, x as i32 + 3, label_row as i32, LABEL_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(frame: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]
    }

    #[test]
    fn envelope_spans_min_to_max() {
        let (w, h) = (4u32, 11u32);
        let mut frame = vec![0u8; (w * h * 4) as usize];
        draw_envelope(&mut frame, w, 0, h, &[-1.0, 0.0], &[1.0, 0.0], [9, 9, 9, 255]);

        for y in 0..h {
            assert_eq!(pixel(&frame, w, 0, y), [9, 9, 9, 255]);
        }
        assert_eq!(pixel(&frame, w, 1, 6), [9, 9, 9, 255]);
        assert_eq!(pixel(&frame, w, 1, 0), [0, 0, 0, 0]);
        // Columns without data stay untouched.
        assert_eq!(pixel(&frame, w, 2, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn fill_and_blit_address_rows() {
        let w = 2u32;
        let mut frame = vec![0u8; (w * 3 * 4) as usize];
        fill_rows(&mut frame, w, 1, 2, [1, 2, 3, 4]);
        assert_eq!(pixel(&frame, w, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&frame, w, 1, 2), [1, 2, 3, 4]);

        blit_rows(&mut frame, w, 0, &[7u8; 8]);
        assert_eq!(pixel(&frame, w, 1, 0), [7, 7, 7, 7]);
        assert_eq!(pixel(&frame, w, 0, 1), [1, 2, 3, 4]);
    }

    #[test]
    fn ticks_outside_frame_are_skipped() {
        let (w, h) = (4u32, 2u32);
        let mut frame = vec![0u8; (w * h * 4) as usize];
        let tick = |x: f64, day: bool| Tick {
            timestamp: 0.0,
            x,
            is_day_boundary: day,
            label: String::new(),
        };
        draw_ticks(&mut frame, w, h, &[tick(1.0, true), tick(-1.0, false), tick(4.0, false)], None, 0);

        assert_ne!(pixel(&frame, w, 1, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&frame, w, 1, 1)[3], 255);
        assert_eq!(pixel(&frame, w, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&frame, w, 3, 1), [0, 0, 0, 0]);
    }
}
