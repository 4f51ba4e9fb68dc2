//! Per-pixel spectrogram transform. `shade` is the host-side twin of the WGSL
//! fragment shader in `render::pipeline`; keep the two in step.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::texture::MagnitudeTexture;

pub const LUT_SIZE: usize = 256;
pub const DB_EPSILON: f32 = 1e-10;
/// Lowest frequency the log scale will ever evaluate.
pub const MIN_FREQUENCY_FLOOR: f32 = 1e-3;
pub const DEFAULT_BACKGROUND: [u8; 4] = [0, 0, 0, 255];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyScale {
    #[default]
    Linear,
    #[serde(rename = "sqrt")]
    SquareRoot,
    #[serde(rename = "log")]
    Logarithmic,
}

impl FrequencyScale {
    /// Physical frequency shown at normalized height `v` in `[0, 1]`.
    pub fn frequency_at(self, v: f32, min_frequency: f32, nyquist: f32) -> f32 {
        let v = v.clamp(0.0, 1.0);
        match self {
            FrequencyScale::Linear => v * nyquist,
            FrequencyScale::SquareRoot => v * v * nyquist,
            FrequencyScale::Logarithmic => {
                let lo = min_frequency.max(MIN_FREQUENCY_FLOOR);
                if lo >= nyquist {
                    return nyquist;
                }
                let log_min = lo.log10();
                let log_max = nyquist.log10();
                10f32.powf(log_min + v * (log_max - log_min))
            }
        }
    }

    /// Matches the `scale` switch in the shader.
    pub fn shader_index(self) -> u32 {
        match self {
            FrequencyScale::Linear => 0,
            FrequencyScale::SquareRoot => 1,
            FrequencyScale::Logarithmic => 2,
        }
    }
}

impl FromStr for FrequencyScale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(FrequencyScale::Linear),
            "sqrt" | "square-root" => Ok(FrequencyScale::SquareRoot),
            "log" | "logarithmic" => Ok(FrequencyScale::Logarithmic),
            other => bail!("Unknown frequency scale: {}", other),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct GradientStop {
    position: f32,
    rgb: [f32; 3],
}

const fn stop(position: f32, r: f32, g: f32, b: f32) -> GradientStop {
    GradientStop {
        position,
        rgb: [r, g, b],
    }
}

const VIRIDIS: &[GradientStop] = &[
    stop(0.00, 0.267, 0.005, 0.329),
    stop(0.25, 0.229, 0.322, 0.546),
    stop(0.50, 0.128, 0.567, 0.551),
    stop(0.75, 0.369, 0.789, 0.383),
    stop(1.00, 0.993, 0.906, 0.144),
];

const INFERNO: &[GradientStop] = &[
    stop(0.00, 0.001, 0.000, 0.014),
    stop(0.25, 0.341, 0.062, 0.429),
    stop(0.50, 0.735, 0.216, 0.330),
    stop(0.75, 0.978, 0.557, 0.035),
    stop(1.00, 0.988, 0.998, 0.645),
];

const GREYSCALE: &[GradientStop] = &[stop(0.0, 0.0, 0.0, 0.0), stop(1.0, 1.0, 1.0, 1.0)];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Viridis,
    Inferno,
    Greyscale,
}

impl Colormap {
    fn stops(self) -> &'static [GradientStop] {
        match self {
            Colormap::Viridis => VIRIDIS,
            Colormap::Inferno => INFERNO,
            Colormap::Greyscale => GREYSCALE,
        }
    }

    /// 256 RGBA entries, index 0 is the quietest level.
    pub fn lut(self) -> Vec<[u8; 4]> {
        let stops = self.stops();
        (0..LUT_SIZE)
            .map(|i| {
                let t = i as f32 / (LUT_SIZE - 1) as f32;
                let [r, g, b] = eval_gradient(stops, t);
                [to_byte(r), to_byte(g), to_byte(b), 255]
            })
            .collect()
    }
}

impl FromStr for Colormap {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "viridis" => Ok(Colormap::Viridis),
            "inferno" => Ok(Colormap::Inferno),
            "greyscale" | "grayscale" | "grey" | "gray" => Ok(Colormap::Greyscale),
            other => bail!("Unknown colormap: {}", other),
        }
    }
}

fn to_byte(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn eval_gradient(stops: &[GradientStop], t: f32) -> [f32; 3] {
    let (first, last) = match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return [0.0; 3],
    };
    if t <= first.position {
        return first.rgb;
    }
    if t >= last.position {
        return last.rgb;
    }
    let idx = stops
        .windows(2)
        .position(|pair| t < pair[1].position)
        .unwrap_or(stops.len() - 2);
    let (s0, s1) = (&stops[idx], &stops[idx + 1]);
    let span = s1.position - s0.position;
    let f = if span.abs() < 1e-6 {
        0.0
    } else {
        ((t - s0.position) / span).clamp(0.0, 1.0)
    };
    [
        s0.rgb[0] + (s1.rgb[0] - s0.rgb[0]) * f,
        s0.rgb[1] + (s1.rgb[1] - s0.rgb[1]) * f,
        s0.rgb[2] + (s1.rgb[2] - s0.rgb[2]) * f,
    ]
}

/// Everything the transform needs besides the textures themselves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShadeParams {
    /// Fractional column window `[start, end]` of the full texture.
    pub full_window: [f32; 2],
    /// Same, in the region texture's padded coordinate space.
    pub region_window: [f32; 2],
    /// 0 shows only the full texture, 1 only the region texture.
    pub region_weight: f32,
    pub stretch: f32,
    pub frequency_scale: FrequencyScale,
    pub min_frequency: f32,
    pub nyquist: f32,
    pub db_floor: f32,
    pub db_range: f32,
    pub background: [u8; 4],
}

impl ShadeParams {
    /// Non-positive or non-finite playback rates behave as 1.
    pub fn effective_stretch(&self) -> f32 {
        if self.stretch.is_finite() && self.stretch > 0.0 {
            self.stretch
        } else {
            1.0
        }
    }
}

/// `20·log10(m + ε)` normalized against `floor..floor + range`, clamped to `[0, 1]`.
pub fn magnitude_to_level(magnitude: f32, db_floor: f32, db_range: f32) -> f32 {
    let db = 20.0 * (magnitude.max(0.0) + DB_EPSILON).log10();
    if db_range <= 0.0 {
        return if db >= db_floor { 1.0 } else { 0.0 };
    }
    ((db - db_floor) / db_range).clamp(0.0, 1.0)
}

fn level_to_color(level: f32, lut: &[[u8; 4]]) -> [u8; 4] {
    if lut.is_empty() {
        let c = to_byte(level);
        return [c, c, c, 255];
    }
    let idx = (level.clamp(0.0, 1.0) * (lut.len() - 1) as f32).round() as usize;
    lut[idx.min(lut.len() - 1)]
}

/// Colour of the output pixel at normalized `(u, v)`, `v = 0` at the bottom.
pub fn shade(
    u: f32,
    v: f32,
    params: &ShadeParams,
    full: Option<&MagnitudeTexture>,
    region: Option<&MagnitudeTexture>,
    lut: &[[u8; 4]],
) -> [u8; 4] {
    if !u.is_finite() || !v.is_finite() {
        return params.background;
    }
    let effective_v = v / params.effective_stretch();
    if effective_v > 1.0 {
        return params.background;
    }

    let freq = params
        .frequency_scale
        .frequency_at(effective_v, params.min_frequency, params.nyquist);
    let row = if params.nyquist > 0.0 { freq / params.nyquist } else { 0.0 };

    let weight = params.region_weight.clamp(0.0, 1.0);
    let level_in = |texture: &MagnitudeTexture, window: [f32; 2]| {
        let column = window[0] + u.clamp(0.0, 1.0) * (window[1] - window[0]);
        magnitude_to_level(texture.sample(column, row), params.db_floor, params.db_range)
    };

    let full_level = full.filter(|_| weight < 1.0).map(|t| level_in(t, params.full_window));
    let region_level = region.filter(|_| weight > 0.0).map(|t| level_in(t, params.region_window));

    let level = match (full_level, region_level) {
        (Some(f), Some(r)) => f + (r - f) * weight,
        (Some(f), None) => f,
        (None, Some(r)) => r,
        (None, None) => return params.background,
    };
    level_to_color(level, lut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::SampleRange;

    fn params() -> ShadeParams {
        ShadeParams {
            full_window: [0.0, 1.0],
            region_window: [0.0, 1.0],
            region_weight: 0.0,
            stretch: 1.0,
            frequency_scale: FrequencyScale::Linear,
            min_frequency: 10.0,
            nyquist: 1000.0,
            db_floor: -100.0,
            db_range: 80.0,
            background: [9, 9, 9, 255],
        }
    }

    fn flat_texture(value: f32, scale: FrequencyScale) -> MagnitudeTexture {
        let mut texture = MagnitudeTexture::new(4, 8, SampleRange::new(0, 100), scale);
        texture.write_columns(0, &vec![vec![value; 8]; 4]);
        texture
    }

    #[test]
    fn log_scale_spans_floor_to_nyquist() {
        let scale = FrequencyScale::Logarithmic;
        assert!((scale.frequency_at(0.0, 10.0, 1000.0) - 10.0).abs() < 1e-3);
        assert!((scale.frequency_at(0.5, 10.0, 1000.0) - 100.0).abs() < 1e-2);
        assert!((scale.frequency_at(1.0, 10.0, 1000.0) - 1000.0).abs() < 1e-1);
        // a zero floor never reaches log(0)
        assert!(scale.frequency_at(0.0, 0.0, 1000.0) > 0.0);
    }

    #[test]
    fn sqrt_scale_squares_height() {
        let f = FrequencyScale::SquareRoot.frequency_at(0.5, 10.0, 1000.0);
        assert!((f - 250.0).abs() < 1e-3);
        assert_eq!(FrequencyScale::Linear.frequency_at(0.5, 10.0, 1000.0), 500.0);
    }

    #[test]
    fn decibel_normalization() {
        assert_eq!(magnitude_to_level(1.0, -100.0, 80.0), 1.0);
        assert!((magnitude_to_level(1e-3, -100.0, 80.0) - 0.5).abs() < 1e-4);
        assert_eq!(magnitude_to_level(0.0, -100.0, 80.0), 0.0);
    }

    #[test]
    fn stretched_content_leaves_background_above() {
        let texture = flat_texture(1.0, FrequencyScale::Linear);
        let lut = Colormap::Greyscale.lut();
        let p = ShadeParams {
            stretch: 0.5,
            ..params()
        };
        assert_eq!(shade(0.5, 0.4, &p, Some(&texture), None, &lut), [255, 255, 255, 255]);
        assert_eq!(shade(0.5, 0.6, &p, Some(&texture), None, &lut), p.background);
    }

    #[test]
    fn region_weight_blends_levels() {
        let full = flat_texture(1e-5, FrequencyScale::Linear); // level 0
        let region = flat_texture(1.0, FrequencyScale::Linear); // level 1
        let lut = Colormap::Greyscale.lut();
        let half = ShadeParams {
            region_weight: 0.5,
            ..params()
        };
        let c = shade(0.5, 0.5, &half, Some(&full), Some(&region), &lut);
        assert_eq!(c[0], 128);
        let only_region = ShadeParams {
            region_weight: 1.0,
            ..params()
        };
        assert_eq!(shade(0.5, 0.5, &only_region, None, Some(&region), &lut)[0], 255);
        assert_eq!(shade(0.5, 0.5, &params(), None, None, &lut), params().background);
    }

    #[test]
    fn window_selects_columns() {
        let mut texture = MagnitudeTexture::new(4, 2, SampleRange::new(0, 100), FrequencyScale::Linear);
        texture.write_columns(0, &[vec![0.0; 2], vec![0.0; 2], vec![1.0; 2], vec![1.0; 2]]);
        let lut = Colormap::Greyscale.lut();
        let right_half = ShadeParams {
            full_window: [0.5, 1.0],
            ..params()
        };
        assert_eq!(shade(0.0, 0.5, &right_half, Some(&texture), None, &lut)[0], 255);
        assert_eq!(shade(0.0, 0.5, &params(), Some(&texture), None, &lut)[0], 0);
    }

    #[test]
    fn colormap_luts_span_their_stops() {
        let lut = Colormap::Viridis.lut();
        assert_eq!(lut.len(), LUT_SIZE);
        assert_eq!(lut[0], [68, 1, 84, 255]);
        assert_eq!(lut[255], [253, 231, 37, 255]);
        assert_eq!(Colormap::Greyscale.lut()[128], [128, 128, 128, 255]);
        assert_eq!("grayscale".parse::<Colormap>().unwrap(), Colormap::Greyscale);
        assert_eq!("log".parse::<FrequencyScale>().unwrap(), FrequencyScale::Logarithmic);
        assert!("mel".parse::<FrequencyScale>().is_err());
    }
}
