// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use quadra_report::{
    DimensionScore, ReportBar, ReportChart, ReportContent, ReportRow, ReportTable,
    analyze_profile, render_chart_raster, render_report,
};
use std::fs;

fn sample_content() -> ReportContent {
    ReportContent {
        title: "DISC Behavioral Assessment".to_owned(),
        subject: "Maya Torres".to_owned(),
        company: "Quadra Labs".to_owned(),
        generated_at: "2026-02-19 12:34".to_owned(),
        tables: vec![ReportTable {
            title: "Score Summary".to_owned(),
            rows: vec![
                ReportRow {
                    label: "Dominance".to_owned(),
                    value: "11".to_owned(),
                },
                ReportRow {
                    label: "Influence".to_owned(),
                    value: "5".to_owned(),
                },
                ReportRow {
                    label: "Total".to_owned(),
                    value: "27".to_owned(),
                },
            ],
        }],
        charts: vec![
            ReportChart {
                title: "DISC Behavioral Profile".to_owned(),
                color: None,
                bars: vec![
                    ReportBar {
                        label: "Dominance".to_owned(),
                        value: 11.0,
                    },
                    ReportBar {
                        label: "Influence".to_owned(),
                        value: 5.0,
                    },
                    ReportBar {
                        label: "Steadiness".to_owned(),
                        value: 8.0,
                    },
                    ReportBar {
                        label: "Conscientiousness".to_owned(),
                        value: 3.0,
                    },
                ],
            },
            ReportChart {
                title: "Share of total (%)".to_owned(),
                color: Some("#53a7a9".to_owned()),
                bars: vec![
                    ReportBar {
                        label: "D".to_owned(),
                        value: 40.7,
                    },
                    ReportBar {
                        label: "I".to_owned(),
                        value: 18.5,
                    },
                ],
            },
        ],
    }
}

#[test]
fn report_renders_to_a_pdf_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pdf_path = dir.path().join("assessment.pdf");
    render_report(&sample_content(), &pdf_path)?;

    let pdf_bytes = fs::read(&pdf_path)?;
    assert!(pdf_bytes.starts_with(b"%PDF"));
    assert!(pdf_bytes.len() > 10_000, "embedded rasters missing");
    Ok(())
}

#[test]
fn single_pair_content_reuses_the_first_table_and_chart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut content = sample_content();
    content.tables.truncate(1);
    content.charts.truncate(1);

    let pdf_path = dir.path().join("anchors.pdf");
    render_report(&content, &pdf_path)?;
    assert!(fs::read(&pdf_path)?.starts_with(b"%PDF"));
    Ok(())
}

#[test]
fn empty_report_still_produces_a_valid_pdf() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pdf_path = dir.path().join("empty.pdf");
    let content = ReportContent {
        title: "DISC Behavioral Assessment".to_owned(),
        ..ReportContent::default()
    };

    render_report(&content, &pdf_path)?;
    let pdf_bytes = fs::read(&pdf_path)?;
    assert!(pdf_bytes.starts_with(b"%PDF"));
    Ok(())
}

#[test]
fn chart_only_content_renders_without_tables() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut content = sample_content();
    content.tables.clear();

    let pdf_path = dir.path().join("charts.pdf");
    render_report(&content, &pdf_path)?;
    assert!(fs::read(&pdf_path)?.starts_with(b"%PDF"));
    Ok(())
}

#[test]
fn raster_dimensions_follow_the_requested_size() -> Result<()> {
    let chart = sample_content().charts.remove(0);
    let raster = render_chart_raster(&chart, 320, 160)?;
    assert_eq!((raster.width, raster.height), (320, 160));
    assert_eq!(raster.rgb.len(), 320 * 160 * 3);
    Ok(())
}

#[test]
fn shipped_knowledge_covers_every_dimension_pair() -> Result<()> {
    let knowledge = include_str!("../../../data/disc_knowledge.md");
    let pairs = [
        ("D", "Dominance", "I", "Influence", "The Driver"),
        ("D", "Dominance", "S", "Steadiness", "The Achiever"),
        ("D", "Dominance", "C", "Conscientiousness", "The Challenger"),
        ("I", "Influence", "S", "Steadiness", "The Counselor"),
        ("I", "Influence", "C", "Conscientiousness", "The Assessor"),
        ("S", "Steadiness", "C", "Conscientiousness", "The Analyst"),
    ];

    for (first, first_label, second, second_label, blend) in pairs {
        let scores = [
            DimensionScore {
                letter: first.to_owned(),
                label: first_label.to_owned(),
                value: 10.0,
            },
            DimensionScore {
                letter: second.to_owned(),
                label: second_label.to_owned(),
                value: 6.0,
            },
        ];
        let narrative = analyze_profile(&scores, knowledge)?;
        assert!(narrative.contains(blend), "missing {blend} for {first}/{second}");
        assert!(
            !narrative.contains("No profile notes"),
            "missing profile notes for {first}"
        );
        assert!(narrative.contains("Strengths:"));
        assert!(narrative.contains("Limitations:"));

        // Ranking is by value, so the reversed ordering finds the same blend.
        let reversed = [
            DimensionScore {
                value: 6.0,
                ..scores[0].clone()
            },
            DimensionScore {
                value: 10.0,
                ..scores[1].clone()
            },
        ];
        let narrative = analyze_profile(&reversed, knowledge)?;
        assert!(narrative.contains(blend), "reversed pair loses {blend}");
    }
    Ok(())
}
