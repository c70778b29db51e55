// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod chart;
pub mod narrative;
pub mod pdf;

pub use chart::{ChartRaster, render_chart_raster};
pub use narrative::{DimensionScore, analyze_profile};
pub use pdf::render_report;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportBar {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportChart {
    pub title: String,
    pub color: Option<String>,
    pub bars: Vec<ReportBar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTable {
    pub title: String,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportContent {
    pub title: String,
    pub subject: String,
    pub company: String,
    pub generated_at: String,
    pub tables: Vec<ReportTable>,
    pub charts: Vec<ReportChart>,
}
