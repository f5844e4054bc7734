// src/renderer.rs

use crate::aggregate::{Series, SeriesPoint};
use crate::config::PaletteConfig;
use crate::error::{Error, Result};
use crate::model::StrictnessLevel;
use chrono::Duration;
use image::{Rgb, RgbImage};
use palette::{FromColor, Lch, Srgb};
use std::path::Path;
use tracing::debug;

const BACKGROUND: Rgb<u8> = Rgb([8, 8, 12]);

/// Chart colour for each strictness level.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: [Rgb<u8>; 5],
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: StrictnessLevel::ALL.map(default_color),
        }
    }
}

impl Palette {
    /// Defaults, with any `#rrggbb` overrides from the configuration.
    pub fn from_config(config: &PaletteConfig) -> Result<Self> {
        let mut palette = Self::default();
        let overrides = [
            (StrictnessLevel::Ignore, &config.ignore),
            (StrictnessLevel::False, &config.false_),
            (StrictnessLevel::True, &config.true_),
            (StrictnessLevel::Strict, &config.strict),
            (StrictnessLevel::Strong, &config.strong),
        ];
        for (level, hex) in overrides {
            if let Some(hex) = hex {
                let rgb: Srgb<u8> = hex.parse().map_err(|e| {
                    Error::Config(format!("palette.{}: `{}` is not a colour: {}", level, hex, e))
                })?;
                palette.colors[level as usize] = Rgb([rgb.red, rgb.green, rgb.blue]);
            }
        }
        Ok(palette)
    }

    pub fn color(&self, level: StrictnessLevel) -> Rgb<u8> {
        self.colors[level as usize]
    }
}

// Red for `ignore` through to green for `strong`.
fn default_color(level: StrictnessLevel) -> Rgb<u8> {
    let step = level as usize as f32 / (StrictnessLevel::ALL.len() - 1) as f32;
    let hue = 30.0f32 + step * 110.0f32;
    let color = Lch::new(62.0f32, 65.0f32, hue);
    let srgb: Srgb<f32> = Srgb::from_color(color);
    let (r, g, b) = srgb.into_components();
    let r_u8 = (r * 255.0f32) as u8;
    let g_u8 = (g * 255.0f32) as u8;
    let b_u8 = (b * 255.0f32) as u8;
    Rgb([r_u8, g_u8, b_u8])
}

/// Stacked step chart of the series: one column per pixel showing the
/// latest point at or before that instant, `strong` at the bottom and
/// `ignore` at the top, each band as tall as that level's share.
pub fn render_chart(series: &Series, palette: &Palette, width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    let (Some(first), Some(last)) = (series.first(), series.last()) else {
        return image;
    };

    let span = (last.timestamp - first.timestamp).num_seconds().max(0);
    let columns: Vec<Option<&SeriesPoint>> = (0..width)
        .map(|x| {
            let offset = span * x as i64 / (width.max(2) - 1) as i64;
            series.at(first.timestamp + Duration::seconds(offset))
        })
        .collect();

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let Some(point) = columns[x as usize] else {
            continue;
        };
        // Height of the pixel's centre above the baseline, in percent.
        let level_pct = ((height - y) as f64 - 0.5) * 100.0 / height as f64;
        let level = StrictnessLevel::ALL
            .into_iter()
            .rev()
            .find(|&level| level_pct < point.at_or_above(level));
        if let Some(level) = level {
            *pixel = palette.color(level);
        }
    }
    image
}

pub fn save_chart(series: &Series, palette: &Palette, width: u32, height: u32, path: &Path) -> Result<()> {
    let image = render_chart(series, palette, width, height);
    image.save(path)?;
    debug!("Wrote {}x{} chart to {}", width, height, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::model::{SigilCounts, Snapshot};
    use chrono::{TimeZone, Utc};

    fn snap(secs: i64, counts: SigilCounts) -> Snapshot {
        Snapshot {
            commit_id: None,
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            counts,
            duration_ms: 0,
        }
    }

    #[test]
    fn default_palette_has_distinct_colors() {
        let palette = Palette::default();
        for (i, a) in StrictnessLevel::ALL.iter().enumerate() {
            for b in &StrictnessLevel::ALL[i + 1..] {
                assert_ne!(palette.color(*a), palette.color(*b));
            }
        }
    }

    #[test]
    fn palette_overrides_and_rejects_bad_hex() {
        let config = PaletteConfig {
            strong: Some("#102030".to_string()),
            ..PaletteConfig::default()
        };
        let palette = Palette::from_config(&config).unwrap();
        assert_eq!(palette.color(StrictnessLevel::Strong), Rgb([0x10, 0x20, 0x30]));
        assert_eq!(
            palette.color(StrictnessLevel::Ignore),
            Palette::default().color(StrictnessLevel::Ignore)
        );

        let bad = PaletteConfig {
            ignore: Some("#zzz".to_string()),
            ..PaletteConfig::default()
        };
        assert!(matches!(Palette::from_config(&bad), Err(Error::Config(_))));
    }

    #[test]
    fn empty_series_renders_background() {
        let image = render_chart(&Series::default(), &Palette::default(), 10, 10);
        assert!(image.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn bands_follow_the_latest_point() {
        let palette = Palette::default();
        let half_strong = SigilCounts::default()
            .with(StrictnessLevel::False, 1)
            .with(StrictnessLevel::Strong, 1);
        let all_true = SigilCounts::default().with(StrictnessLevel::True, 4);
        let series = aggregate(&[snap(0, half_strong), snap(100, all_true)]);

        let image = render_chart(&series, &palette, 11, 10);

        // Left edge: bottom half strong, top half false.
        assert_eq!(*image.get_pixel(0, 9), palette.color(StrictnessLevel::Strong));
        assert_eq!(*image.get_pixel(0, 0), palette.color(StrictnessLevel::False));
        // Right edge: everything true.
        assert_eq!(*image.get_pixel(10, 9), palette.color(StrictnessLevel::True));
        assert_eq!(*image.get_pixel(10, 0), palette.color(StrictnessLevel::True));
    }

    #[test]
    fn zero_total_columns_stay_blank() {
        let series = aggregate(&[snap(0, SigilCounts::default())]);
        let image = render_chart(&series, &Palette::default(), 4, 4);
        assert!(image.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn chart_is_written_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.png");
        let series = aggregate(&[snap(0, SigilCounts::default().with(StrictnessLevel::Strict, 1))]);
        save_chart(&series, &Palette::default(), 20, 10, &path).unwrap();
        let loaded = image::open(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (20, 10));
    }
}
