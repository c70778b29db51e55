// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub letter: String,
    pub label: String,
    pub value: f64,
}

/// Ranks the dimensions, then builds prose from the knowledge text: the
/// combined section for the two strongest dimensions (either heading order)
/// when it exists, followed by the primary dimension's own profile notes.
pub fn analyze_profile(scores: &[DimensionScore], knowledge: &str) -> Result<String> {
    if scores.len() < 2 {
        bail!("profile analysis needs at least two dimension scores");
    }

    let mut ranked: Vec<&DimensionScore> = scores.iter().collect();
    ranked.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal));
    let top = ranked[0];
    let second = ranked[1];

    let mut out = String::new();
    out.push_str(&format!(
        "Dominant profile: {} ({}) with {} ({})\n",
        top.label, top.letter, second.label, second.letter
    ));

    if let Some((pair_name, body)) = find_combined_section(knowledge, &top.letter, &second.letter)
    {
        out.push('\n');
        out.push_str(&format!("{pair_name}\n"));
        if !body.is_empty() {
            out.push_str(&body);
            out.push('\n');
        }
    }

    out.push('\n');
    match find_section(knowledge, &format!("### Profile {} - ", top.letter)) {
        Some((label, body)) => {
            out.push_str(&format!("{} ({})\n", label, top.letter));
            let notes = split_profile(&body);
            if !notes.description.is_empty() {
                out.push_str(&notes.description);
                out.push('\n');
            }
            push_bullets(&mut out, "Strengths:", &notes.strengths);
            push_bullets(&mut out, "Limitations:", &notes.limitations);
        }
        None => {
            out.push_str(&format!(
                "No profile notes found for {} ({}).\n",
                top.label, top.letter
            ));
        }
    }

    Ok(out)
}

fn find_combined_section(knowledge: &str, first: &str, second: &str) -> Option<(String, String)> {
    find_section(knowledge, &format!("### {first}/{second} - "))
        .or_else(|| find_section(knowledge, &format!("### {second}/{first} - ")))
}

fn find_section(knowledge: &str, heading_prefix: &str) -> Option<(String, String)> {
    let mut lines = knowledge.lines();
    let rest = loop {
        let line = lines.next()?;
        if let Some(rest) = line.trim_end().strip_prefix(heading_prefix) {
            break rest.trim().to_owned();
        }
    };

    let mut body_lines = Vec::new();
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed.starts_with("### ") || trimmed.starts_with("## ") {
            break;
        }
        body_lines.push(trimmed);
    }

    Some((rest, body_lines.join("\n").trim().to_owned()))
}

struct ProfileNotes {
    description: String,
    strengths: Vec<String>,
    limitations: Vec<String>,
}

fn split_profile(body: &str) -> ProfileNotes {
    let mut description = Vec::new();
    let mut strengths = Vec::new();
    let mut limitations = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(items) = trimmed.strip_prefix("- **Strengths:**") {
            strengths = split_items(items);
        } else if let Some(items) = trimmed.strip_prefix("- **Limitations:**") {
            limitations = split_items(items);
        } else if !trimmed.is_empty() {
            description.push(trimmed);
        }
    }

    ProfileNotes {
        description: description.join("\n"),
        strengths,
        limitations,
    }
}

fn split_items(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_end_matches('.').to_owned())
        .filter(|item| !item.is_empty())
        .collect()
}

fn push_bullets(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(heading);
    out.push('\n');
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}
