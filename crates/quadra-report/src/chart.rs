// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::ReportChart;
use anyhow::{Result, anyhow};
use plotters::coord::Shift;
use plotters::prelude::*;

pub(crate) const PALETTE: [RGBColor; 4] = [
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x2c, 0xa0, 0x2c),
    RGBColor(0xd6, 0x27, 0x28),
];

// Bars reach this fraction of the raster height at most, leaving headroom for
// the value captions the PDF layer draws on top.
pub(crate) const BAR_SPAN: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRaster {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Draws the bars into an RGB pixel buffer. Geometry only: captions and axis
/// labels are typeset by whoever places the raster.
pub fn render_chart_raster(chart: &ReportChart, width: u32, height: u32) -> Result<ChartRaster> {
    if width == 0 || height == 0 {
        return Err(anyhow!("chart raster must have a non-zero size"));
    }

    let mut rgb = vec![0_u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (width, height)).into_drawing_area();
        draw_bars(&root, chart, width, height)?;
        root.present()
            .map_err(|error| anyhow!("finish chart raster: {error}"))?;
    }

    Ok(ChartRaster { width, height, rgb })
}

fn draw_bars(
    root: &DrawingArea<BitMapBackend<'_>, Shift>,
    chart: &ReportChart,
    width: u32,
    height: u32,
) -> Result<()> {
    root.fill(&WHITE)
        .map_err(|error| anyhow!("fill chart background: {error}"))?;

    let max_value = chart
        .bars
        .iter()
        .map(|bar| bar.value)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let slots = chart.bars.len().max(1) as f64;
    let slot_width = f64::from(width) / slots;
    let base = height as i32 - 1;

    for (position, bar) in chart.bars.iter().enumerate() {
        let color = bar_color(chart.color.as_deref(), position);
        let slot_start = position as f64 * slot_width;
        let x0 = (slot_start + slot_width * 0.2).round() as i32;
        let x1 = (slot_start + slot_width * 0.8).round() as i32;
        let bar_height =
            (bar.value.max(0.0) / max_value * f64::from(height) * BAR_SPAN).round() as i32;
        if bar_height == 0 {
            continue;
        }
        root.draw(&Rectangle::new(
            [(x0, base - bar_height), (x1, base)],
            color.filled(),
        ))
        .map_err(|error| anyhow!("draw bar {}: {error}", bar.label))?;
    }

    root.draw(&PathElement::new(
        vec![(0, base), (width as i32 - 1, base)],
        BLACK.stroke_width(2),
    ))
    .map_err(|error| anyhow!("draw chart baseline: {error}"))?;
    Ok(())
}

/// A configured color applies to every bar; without one the bars cycle
/// through the palette.
pub fn bar_color(configured: Option<&str>, position: usize) -> RGBColor {
    match configured {
        Some(raw) => parse_hex_color(raw).unwrap_or(PALETTE[0]),
        None => PALETTE[position % PALETTE.len()],
    }
}

pub fn parse_hex_color(raw: &str) -> Option<RGBColor> {
    let hex = raw.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    let red = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let green = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let blue = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(RGBColor(red, green, blue))
}

#[cfg(test)]
mod tests {
    use super::{PALETTE, bar_color, parse_hex_color, render_chart_raster};
    use crate::{ReportBar, ReportChart};

    fn two_bar_chart(color: Option<&str>) -> ReportChart {
        ReportChart {
            title: "Profile".to_owned(),
            color: color.map(str::to_owned),
            bars: vec![
                ReportBar {
                    label: "D".to_owned(),
                    value: 10.0,
                },
                ReportBar {
                    label: "I".to_owned(),
                    value: 5.0,
                },
            ],
        }
    }

    fn pixel(raster: &super::ChartRaster, x: u32, y: u32) -> (u8, u8, u8) {
        let index = ((y * raster.width + x) * 3) as usize;
        (
            raster.rgb[index],
            raster.rgb[index + 1],
            raster.rgb[index + 2],
        )
    }

    #[test]
    fn bars_land_in_their_slots_with_the_configured_color() {
        let raster = render_chart_raster(&two_bar_chart(Some("#ff0000")), 400, 200)
            .expect("raster renders");
        assert_eq!(raster.rgb.len(), 400 * 200 * 3);

        // Center of the first slot, well inside the tallest bar.
        assert_eq!(pixel(&raster, 100, 150), (0xff, 0x00, 0x00));
        // Center of the second slot, above the shorter bar but below the
        // first bar's top.
        assert_eq!(pixel(&raster, 300, 80), (0xff, 0xff, 0xff));
        assert_eq!(pixel(&raster, 300, 150), (0xff, 0x00, 0x00));
        // Outside every slot's bar band.
        assert_eq!(pixel(&raster, 2, 2), (0xff, 0xff, 0xff));
    }

    #[test]
    fn unconfigured_bars_use_distinct_palette_colors() {
        let raster =
            render_chart_raster(&two_bar_chart(None), 400, 200).expect("raster renders");
        let first = pixel(&raster, 100, 150);
        let second = pixel(&raster, 300, 150);
        assert_ne!(first, second);
        assert_eq!(first, (PALETTE[0].0, PALETTE[0].1, PALETTE[0].2));
        assert_eq!(second, (PALETTE[1].0, PALETTE[1].1, PALETTE[1].2));
    }

    #[test]
    fn empty_chart_renders_a_blank_raster() {
        let chart = ReportChart {
            title: "Empty".to_owned(),
            color: None,
            bars: Vec::new(),
        };
        let raster = render_chart_raster(&chart, 80, 40).expect("raster renders");
        assert_eq!(pixel(&raster, 40, 20), (0xff, 0xff, 0xff));
    }

    #[test]
    fn zero_sized_raster_is_rejected() {
        let error = render_chart_raster(&two_bar_chart(None), 0, 40)
            .expect_err("zero width cannot render");
        assert!(error.to_string().contains("non-zero"));
    }

    #[test]
    fn parses_six_digit_hex_colors() {
        let color = parse_hex_color("#53a7a9").expect("valid color");
        assert_eq!((color.0, color.1, color.2), (0x53, 0xa7, 0xa9));
        assert!(parse_hex_color(" #4C78A8 ").is_some());
    }

    #[test]
    fn rejects_malformed_colors() {
        assert!(parse_hex_color("53a7a9").is_none());
        assert!(parse_hex_color("#53a7").is_none());
        assert!(parse_hex_color("#53a7g9").is_none());
        assert!(parse_hex_color("teal").is_none());
    }

    #[test]
    fn unconfigured_bars_cycle_the_palette() {
        for position in 0..8 {
            let color = bar_color(None, position);
            let expected = PALETTE[position % PALETTE.len()];
            assert_eq!(
                (color.0, color.1, color.2),
                (expected.0, expected.1, expected.2)
            );
        }
    }

    #[test]
    fn configured_color_applies_to_every_bar() {
        for position in 0..4 {
            let color = bar_color(Some("#53a7a9"), position);
            assert_eq!((color.0, color.1, color.2), (0x53, 0xa7, 0xa9));
        }
    }

    #[test]
    fn unparsable_configured_color_falls_back_to_the_first_palette_entry() {
        let color = bar_color(Some("teal"), 2);
        let expected = PALETTE[0];
        assert_eq!(
            (color.0, color.1, color.2),
            (expected.0, expected.1, expected.2)
        );
    }
}
