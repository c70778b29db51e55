// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::*;

pub const TEMPLATE_OWNER: UserId = UserId::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Standard,
    Elevated,
    Admin,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(Self::Standard),
            "elevated" => Some(Self::Elevated),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Elevated => "elevated",
            Self::Admin => "administrator",
        }
    }

    pub const fn meets(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Elevated => 1,
            Self::Admin => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Label,
    Spacer,
    Formula,
    HorizontalFormula,
    LookupCopy,
    Chart,
    SummaryTable,
    Input,
    Selector,
}

impl ElementKind {
    pub const ALL: [Self; 9] = [
        Self::Label,
        Self::Spacer,
        Self::Formula,
        Self::HorizontalFormula,
        Self::LookupCopy,
        Self::Chart,
        Self::SummaryTable,
        Self::Input,
        Self::Selector,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Spacer => "spacer",
            Self::Formula => "formula",
            Self::HorizontalFormula => "horizontal-formula",
            Self::LookupCopy => "lookup-copy",
            Self::Chart => "chart",
            Self::SummaryTable => "summary-table",
            Self::Input => "input",
            Self::Selector => "selector",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "label" => Some(Self::Label),
            "spacer" => Some(Self::Spacer),
            "formula" => Some(Self::Formula),
            "horizontal-formula" => Some(Self::HorizontalFormula),
            "lookup-copy" => Some(Self::LookupCopy),
            "chart" => Some(Self::Chart),
            "summary-table" => Some(Self::SummaryTable),
            "input" => Some(Self::Input),
            "selector" => Some(Self::Selector),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormTable {
    DiscSurvey,
    AnchorsSurvey,
    DiscResults,
    AnchorsResults,
}

impl FormTable {
    pub const ALL: [Self; 4] = [
        Self::DiscSurvey,
        Self::AnchorsSurvey,
        Self::DiscResults,
        Self::AnchorsResults,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DiscSurvey => "disc_survey",
            Self::AnchorsSurvey => "anchors_survey",
            Self::DiscResults => "disc_results",
            Self::AnchorsResults => "anchors_results",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disc_survey" => Some(Self::DiscSurvey),
            "anchors_survey" => Some(Self::AnchorsSurvey),
            "disc_results" => Some(Self::DiscResults),
            "anchors_results" => Some(Self::AnchorsResults),
            _ => None,
        }
    }

    pub const fn table_name(self) -> &'static str {
        match self {
            Self::DiscSurvey => "form_disc_survey",
            Self::AnchorsSurvey => "form_anchors_survey",
            Self::DiscResults => "form_disc_results",
            Self::AnchorsResults => "form_anchors_results",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::DiscSurvey => "DISC Behavioral Survey",
            Self::AnchorsSurvey => "Career Anchors Survey",
            Self::DiscResults => "DISC Behavioral Assessment",
            Self::AnchorsResults => "Career Anchors Assessment",
        }
    }

    pub const fn source_form(self) -> Option<Self> {
        match self {
            Self::DiscResults => Some(Self::DiscSurvey),
            Self::AnchorsResults => Some(Self::AnchorsSurvey),
            Self::DiscSurvey | Self::AnchorsSurvey => None,
        }
    }

    pub const fn is_results(self) -> bool {
        self.source_form().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppMode {
    Login,
    Nav,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabKind {
    Welcome,
    DiscSurvey,
    AnchorsSurvey,
    DiscResults,
    AnchorsResults,
    Monitor,
    Reset,
}

impl TabKind {
    pub const ALL: [Self; 7] = [
        Self::Welcome,
        Self::DiscSurvey,
        Self::AnchorsSurvey,
        Self::DiscResults,
        Self::AnchorsResults,
        Self::Monitor,
        Self::Reset,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::DiscSurvey => "disc survey",
            Self::AnchorsSurvey => "anchors survey",
            Self::DiscResults => "disc results",
            Self::AnchorsResults => "anchors results",
            Self::Monitor => "monitor",
            Self::Reset => "reset",
        }
    }

    pub const fn min_role(self) -> Role {
        match self {
            Self::Monitor => Role::Elevated,
            _ => Role::Standard,
        }
    }

    pub const fn form(self) -> Option<FormTable> {
        match self {
            Self::DiscSurvey => Some(FormTable::DiscSurvey),
            Self::AnchorsSurvey => Some(FormTable::AnchorsSurvey),
            Self::DiscResults => Some(FormTable::DiscResults),
            Self::AnchorsResults => Some(FormTable::AnchorsResults),
            Self::Welcome | Self::Monitor | Self::Reset => None,
        }
    }

    pub fn visible_for(role: Role) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|tab| role.meets(tab.min_role()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPair {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SeriesSpec {
    Absent,
    Pairs(Vec<SeriesPair>),
    Mismatched { names: usize, labels: usize },
}

impl SeriesSpec {
    pub fn parse(selection: Option<&str>, labels: Option<&str>) -> Self {
        let names = split_list(selection);
        let label_list = split_list(labels);
        match (names, label_list) {
            (None, None) => Self::Absent,
            (Some(names), None) => Self::Mismatched {
                names: names.len(),
                labels: 0,
            },
            (None, Some(labels)) => Self::Mismatched {
                names: 0,
                labels: labels.len(),
            },
            (Some(names), Some(labels)) => {
                if names.len() != labels.len() {
                    return Self::Mismatched {
                        names: names.len(),
                        labels: labels.len(),
                    };
                }
                Self::Pairs(
                    names
                        .into_iter()
                        .zip(labels)
                        .map(|(name, label)| SeriesPair { name, label })
                        .collect(),
                )
            }
        }
    }

    pub fn pairs(&self) -> Option<&[SeriesPair]> {
        match self {
            Self::Pairs(pairs) => Some(pairs),
            Self::Absent | Self::Mismatched { .. } => None,
        }
    }

    pub fn options(&self) -> Vec<(f64, String)> {
        let Some(pairs) = self.pairs() else {
            return Vec::new();
        };
        pairs
            .iter()
            .filter_map(|pair| {
                pair.name
                    .parse::<f64>()
                    .ok()
                    .map(|score| (score, pair.label.clone()))
            })
            .collect()
    }
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(raw.split('|').map(|part| part.trim().to_owned()).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub owner: UserId,
    pub name: String,
    pub kind: ElementKind,
    pub expression: Option<String>,
    pub message: Option<String>,
    pub value: Option<f64>,
    pub series: SeriesSpec,
    pub column: i32,
    pub row: i32,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSet {
    elements: Vec<Element>,
}

impl ElementSet {
    pub fn from_rows(mut rows: Vec<Element>) -> Self {
        rows.sort_by_key(|element| (element.row, element.column, element.id));
        Self { elements: rows }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn latest(&self, name: &str) -> Option<&Element> {
        self.elements
            .iter()
            .filter(|element| element.name == name)
            .max_by_key(|element| element.id)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.latest(name).and_then(|element| element.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub company: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub company: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub owner: UserId,
    pub form: FormTable,
}

impl RequestContext {
    pub const fn new(owner: UserId, form: FormTable) -> Self {
        Self { owner, form }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: AccessLogEntryId,
    pub user_id: UserId,
    pub program: String,
    pub action: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SurveyProgress {
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DashboardCounts {
    pub disc: SurveyProgress,
    pub anchors: SurveyProgress,
}

pub fn format_score(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "0".to_owned();
    };
    if !value.is_finite() {
        return "0".to_owned();
    }
    if value.abs() >= 1.0 {
        group_thousands(value.round() as i128)
    } else {
        format!("{value:.3}").replace('.', ",")
    }
}

pub fn resolve_message(message: &str, value: Option<f64>) -> String {
    match value {
        Some(value) => message.replace("{value}", &format_score(Some(value))),
        None => message.to_owned(),
    }
}

fn group_thousands(value: i128) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    let mut count = 0usize;
    for ch in digits.chars().rev() {
        if count == 3 {
            grouped.push('.');
            count = 0;
        }
        grouped.push(ch);
        count += 1;
    }
    let body = grouped.chars().rev().collect::<String>();
    format!("{sign}{body}")
}
