// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::chart::{BAR_SPAN, render_chart_raster};
use crate::{ReportChart, ReportContent, ReportTable};
use anyhow::{Context, Result};
use printpdf::{
    BuiltinFont, Color, ColorBits, ColorSpace, Image, ImageTransform, ImageXObject,
    IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerIndex,
    PdfLayerReference, PdfPageIndex, Point, Px, Rgb, TextRenderingMode,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

const PAGE_WIDTH: f64 = 210.0;
const PAGE_HEIGHT: f64 = 297.0;
// 36 pt margins on A4.
const MARGIN: f64 = 12.7;
const TITLE_SIZE: f64 = 26.0;
const SUBTITLE_SIZE: f64 = 20.0;
const HEADING_SIZE: f64 = 18.0;
const BODY_SIZE: f64 = 14.0;
const SMALL_SIZE: f64 = 12.0;
const ROW_HEIGHT: f64 = 8.2;
const CHART_HEIGHT: f64 = 62.0;
const PT_TO_MM: f64 = 0.352778;
// Chart rasters are rendered at three times the 72 dpi point grid.
const RASTER_DPI: f64 = 216.0;

/// Writes the report to `path` with the fixed template: title, subtitle, then
/// two summary-table/chart pairs. A missing second table or chart falls back
/// to the first one.
pub fn render_report(content: &ReportContent, path: &Path) -> Result<()> {
    let mut writer = PageWriter::new(&content.title)?;

    writer.gap(2.0);
    writer.write_line(&content.title, TITLE_SIZE, true, rgb(0.10, 0.25, 0.45));
    let subtitle = if content.company.is_empty() {
        content.subject.clone()
    } else {
        format!("{} ({})", content.subject, content.company)
    };
    if !subtitle.is_empty() {
        writer.write_line(&subtitle, SUBTITLE_SIZE, false, rgb(0.25, 0.25, 0.25));
    }
    if !content.generated_at.is_empty() {
        let stamp = format!("Generated {}", content.generated_at);
        writer.write_line(&stamp, SMALL_SIZE, false, rgb(0.45, 0.45, 0.45));
    }
    writer.gap(2.5);
    let rule_y = writer.cursor;
    writer.stroke_line(
        (MARGIN, rule_y),
        (PAGE_WIDTH - MARGIN, rule_y),
        1.1,
        rgb(0.10, 0.25, 0.45),
    );
    writer.gap(8.0);

    let pair_count = if content.tables.is_empty() && content.charts.is_empty() {
        0
    } else {
        2
    };
    for index in 0..pair_count {
        if let Some(table) = content.tables.get(index).or_else(|| content.tables.first()) {
            writer.draw_table(table);
        }
        if let Some(chart) = content.charts.get(index).or_else(|| content.charts.first()) {
            writer.draw_chart(chart)?;
        }
    }

    writer.finish(path)
}

struct PageWriter {
    doc: PdfDocumentReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    page: PdfPageIndex,
    layer: PdfLayerIndex,
    cursor: f64,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .context("load builtin Helvetica")?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .context("load builtin Helvetica Bold")?;
        Ok(Self {
            doc,
            regular,
            bold,
            page,
            layer,
            cursor: PAGE_HEIGHT - MARGIN,
        })
    }

    fn layer(&self) -> PdfLayerReference {
        self.doc.get_page(self.page).get_layer(self.layer)
    }

    fn break_page(&mut self) {
        let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.page = page;
        self.layer = layer;
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    fn ensure_room(&mut self, needed: f64) {
        if self.cursor - needed < MARGIN {
            self.break_page();
        }
    }

    fn gap(&mut self, mm: f64) {
        self.cursor -= mm;
    }

    fn write_line(&mut self, text: &str, size: f64, bold: bool, color: Color) {
        let step = size * PT_TO_MM + 1.8;
        self.ensure_room(step);
        self.cursor -= step;
        let font = if bold { &self.bold } else { &self.regular };
        self.draw_text(text, size, MARGIN, self.cursor, font, color);
    }

    fn draw_text(
        &self,
        text: &str,
        size: f64,
        x: f64,
        y: f64,
        font: &IndirectFontRef,
        color: Color,
    ) {
        let layer = self.layer();
        layer.set_fill_color(color);
        layer.begin_text_section();
        layer.set_font(font, size);
        layer.set_text_cursor(Mm(x), Mm(y));
        layer.set_text_rendering_mode(TextRenderingMode::Fill);
        layer.write_text(text, font);
        layer.end_text_section();
    }

    fn filled_rect(&self, x: f64, y: f64, width: f64, height: f64, color: Color) {
        let layer = self.layer();
        layer.set_fill_color(color);
        layer.add_shape(Line {
            points: vec![
                (Point::new(Mm(x), Mm(y)), false),
                (Point::new(Mm(x + width), Mm(y)), false),
                (Point::new(Mm(x + width), Mm(y + height)), false),
                (Point::new(Mm(x), Mm(y + height)), false),
            ],
            is_closed: true,
            has_fill: true,
            has_stroke: false,
            is_clipping_path: false,
        });
    }

    fn stroke_line(&self, from: (f64, f64), to: (f64, f64), thickness: f64, color: Color) {
        let layer = self.layer();
        layer.set_outline_color(color);
        layer.set_outline_thickness(thickness);
        layer.add_shape(Line {
            points: vec![
                (Point::new(Mm(from.0), Mm(from.1)), false),
                (Point::new(Mm(to.0), Mm(to.1)), false),
            ],
            is_closed: false,
            has_fill: false,
            has_stroke: true,
            is_clipping_path: false,
        });
    }

    fn draw_table(&mut self, table: &ReportTable) {
        self.ensure_room(ROW_HEIGHT * table.rows.len() as f64 + 18.0);
        self.write_line(&table.title, HEADING_SIZE, true, rgb(0.13, 0.13, 0.13));
        self.gap(2.2);

        let left = MARGIN;
        let right = PAGE_WIDTH - MARGIN;
        let top = self.cursor;
        for (index, row) in table.rows.iter().enumerate() {
            let row_bottom = self.cursor - ROW_HEIGHT;
            if index % 2 == 1 {
                self.filled_rect(left, row_bottom, right - left, ROW_HEIGHT, rgb(0.94, 0.96, 0.94));
            }
            let baseline = row_bottom + 2.4;
            self.draw_text(&row.label, BODY_SIZE, left + 3.0, baseline, &self.regular, black());
            let value_x = right - 3.0 - text_width_mm(&row.value, BODY_SIZE);
            self.draw_text(&row.value, BODY_SIZE, value_x, baseline, &self.regular, black());
            self.cursor = row_bottom;
        }

        let bottom = self.cursor;
        for separator in 0..=table.rows.len() {
            let y = top - ROW_HEIGHT * separator as f64;
            self.stroke_line((left, y), (right, y), 0.5, rgb(0.62, 0.62, 0.62));
        }
        self.stroke_line((left, bottom), (left, top), 0.5, rgb(0.62, 0.62, 0.62));
        self.stroke_line((right, bottom), (right, top), 0.5, rgb(0.62, 0.62, 0.62));
        self.gap(8.0);
    }

    fn draw_chart(&mut self, chart: &ReportChart) -> Result<()> {
        self.ensure_room(CHART_HEIGHT + 30.0);
        self.write_line(&chart.title, HEADING_SIZE, true, rgb(0.13, 0.13, 0.13));
        self.gap(3.0);

        let left = MARGIN;
        let width_mm = PAGE_WIDTH - MARGIN * 2.0;
        let top = self.cursor;
        let base = top - CHART_HEIGHT;

        let raster = render_chart_raster(chart, raster_px(width_mm), raster_px(CHART_HEIGHT))?;
        let image = Image::from(ImageXObject {
            width: Px(raster.width as usize),
            height: Px(raster.height as usize),
            color_space: ColorSpace::Rgb,
            bits_per_component: ColorBits::Bit8,
            interpolate: true,
            image_data: raster.rgb,
            image_filter: None,
            clipping_bbox: None,
        });
        image.add_to_layer(
            self.layer(),
            ImageTransform {
                translate_x: Some(Mm(left)),
                translate_y: Some(Mm(base)),
                dpi: Some(RASTER_DPI),
                ..ImageTransform::default()
            },
        );

        // The raster carries bar geometry only; captions are typeset here.
        let max_value = chart
            .bars
            .iter()
            .map(|bar| bar.value)
            .fold(0.0_f64, f64::max)
            .max(1.0);
        let slots = chart.bars.len().max(1) as f64;
        let slot_width = width_mm / slots;
        for (position, bar) in chart.bars.iter().enumerate() {
            let center = left + (position as f64 + 0.5) * slot_width;

            let value_text = format_bar_value(bar.value);
            let value_x = center - text_width_mm(&value_text, SMALL_SIZE) / 2.0;
            let bar_top = base + bar.value.max(0.0) / max_value * (CHART_HEIGHT * BAR_SPAN);
            self.draw_text(&value_text, SMALL_SIZE, value_x, bar_top + 1.8, &self.regular, rgb(0.2, 0.2, 0.2));

            let label_x = center - text_width_mm(&bar.label, SMALL_SIZE) / 2.0;
            self.draw_text(&bar.label, SMALL_SIZE, label_x.max(left), base - 5.6, &self.regular, black());
        }

        self.cursor = base - 9.0;
        self.gap(4.0);
        Ok(())
    }

    fn finish(self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("create report file {}", path.display()))?;
        let mut out = BufWriter::new(file);
        self.doc.save(&mut out).context("write pdf report")?;
        Ok(())
    }
}

fn rgb(red: f64, green: f64, blue: f64) -> Color {
    Color::Rgb(Rgb::new(red, green, blue, None))
}

fn black() -> Color {
    rgb(0.0, 0.0, 0.0)
}

fn raster_px(mm: f64) -> u32 {
    (mm / 25.4 * RASTER_DPI).round() as u32
}

// Helvetica has no metrics here; half the point size is close enough for
// right-aligning values and centering bar captions.
fn text_width_mm(text: &str, size: f64) -> f64 {
    text.chars().count() as f64 * size * 0.5 * PT_TO_MM
}

fn format_bar_value(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{value:.1}")
    }
}

#[cfg(test)]
mod tests {
    use super::{format_bar_value, raster_px};

    #[test]
    fn bar_values_drop_trailing_zeroes() {
        assert_eq!(format_bar_value(11.0), "11");
        assert_eq!(format_bar_value(40.74), "40.7");
        assert_eq!(format_bar_value(0.0), "0");
    }

    #[test]
    fn raster_scale_triples_the_point_grid() {
        // 25.4 mm is 72 pt, so at 3x it becomes 216 pixels.
        assert_eq!(raster_px(25.4), 216);
    }
}
