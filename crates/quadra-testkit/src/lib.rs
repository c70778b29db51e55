// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use quadra_app::{ElementKind, FormTable};
use rusqlite::Connection;
use std::path::PathBuf;

const FIRST_NAMES: [&str; 16] = [
    "Maya", "Omar", "Priya", "Lucas", "Ingrid", "Tomas", "Aisha", "Felix", "Nadia", "Ravi",
    "Clara", "Dmitri", "Yuki", "Sofia", "Henrik", "Amara",
];
const LAST_NAMES: [&str; 18] = [
    "Torres", "Haddad", "Lindqvist", "Okafor", "Petrov", "Tanaka", "Moreau", "Silva", "Novak",
    "Iyer", "Keller", "Andersen", "Costa", "Farrell", "Mbeki", "Ortega", "Weiss", "Zhang",
];

const EMAIL_DOMAINS: [&str; 5] = [
    "example-hr.com",
    "talentworks.io",
    "crewbase.net",
    "peoplelab.org",
    "example-corp.com",
];

const COMPANY_ADJECTIVES: [&str; 12] = [
    "Summit", "Harbor", "Northwind", "Beacon", "Cascade", "Meridian", "Atlas", "Juniper",
    "Vantage", "Cobalt", "Redwood", "Lumen",
];
const COMPANY_FIELDS: [&str; 10] = [
    "Analytics",
    "Consulting",
    "Logistics",
    "Robotics",
    "Biotech",
    "Media",
    "Systems",
    "Energy",
    "Textiles",
    "Finance",
];
const COMPANY_SUFFIXES: [&str; 6] = ["Group", "Labs", "Partners", "Co", "Collective", "AG"];

const DISC_SELECTOR_NAMES: [&str; 12] = [
    "d1", "d2", "d3", "i1", "i2", "i3", "s1", "s2", "s3", "c1", "c2", "c3",
];
const ANCHOR_INPUT_NAMES: [&str; 8] = [
    "anchor_technical",
    "anchor_managerial",
    "anchor_autonomy",
    "anchor_security",
    "anchor_creativity",
    "anchor_service",
    "anchor_challenge",
    "anchor_lifestyle",
];

const DISC_RATING_MAX: i32 = 4;
const ANCHOR_RATING_MAX: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonFixture {
    pub name: String,
    pub email: String,
    pub password: String,
    pub company: String,
}

/// Raw row shape for the form tables, for tests that need to plant rows the
/// public store API would never write (duplicate names, stray kinds).
#[derive(Debug, Clone, PartialEq)]
pub struct RawElementRow {
    pub owner: i64,
    pub name: String,
    pub kind: ElementKind,
    pub expression: Option<String>,
    pub message: Option<String>,
    pub value: Option<f64>,
    pub selection_spec: Option<String>,
    pub label_spec: Option<String>,
    pub column: i32,
    pub row: i32,
    pub color: Option<String>,
}

impl RawElementRow {
    pub fn new(owner: i64, name: &str, kind: ElementKind) -> Self {
        Self {
            owner,
            name: name.to_owned(),
            kind,
            expression: None,
            message: None,
            value: None,
            selection_spec: None,
            label_spec: None,
            column: 1,
            row: 1,
            color: None,
        }
    }

    pub fn value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn position(mut self, row: i32, column: i32) -> Self {
        self.row = row;
        self.column = column;
        self
    }
}

pub fn insert_raw_element(conn: &Connection, form: FormTable, row: &RawElementRow) -> Result<()> {
    let sql = format!(
        "
        INSERT INTO {} (owner_id, name, kind, expression, message, value,
                        selection_spec, label_spec, col_pos, row_pos, color)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ",
        form.table_name()
    );
    conn.execute(
        &sql,
        rusqlite::params![
            row.owner,
            row.name,
            row.kind.as_str(),
            row.expression,
            row.message,
            row.value,
            row.selection_spec,
            row.label_spec,
            row.column,
            row.row,
            row.color,
        ],
    )
    .with_context(|| format!("insert fixture row into {}", form.table_name()))?;
    Ok(())
}

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }
}

#[derive(Debug, Clone)]
pub struct AssessmentFaker {
    rng: DeterministicRng,
}

impl AssessmentFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
        }
    }

    pub fn int_n(&mut self, n: usize) -> usize {
        self.rng.int_n(n)
    }

    pub fn person(&mut self) -> PersonFixture {
        let first = self.pick(&FIRST_NAMES);
        let last = self.pick(&LAST_NAMES);
        let domain = self.pick(&EMAIL_DOMAINS);
        let tag = self.int_range_i32(10, 99);
        PersonFixture {
            name: format!("{first} {last}"),
            email: format!("{}.{}{tag}@{domain}", email_slug(first), email_slug(last)),
            password: format!("pw-{:04}", self.int_range_i32(0, 9_999)),
            company: self.company(),
        }
    }

    pub fn company(&mut self) -> String {
        format!(
            "{} {} {}",
            self.pick(&COMPANY_ADJECTIVES),
            self.pick(&COMPANY_FIELDS),
            self.pick(&COMPANY_SUFFIXES),
        )
    }

    pub fn disc_answer(&mut self) -> f64 {
        f64::from(self.int_range_i32(0, DISC_RATING_MAX))
    }

    pub fn anchor_rating(&mut self) -> f64 {
        f64::from(self.int_range_i32(0, ANCHOR_RATING_MAX))
    }

    pub fn disc_answer_sheet(&mut self) -> Vec<(&'static str, f64)> {
        DISC_SELECTOR_NAMES
            .iter()
            .map(|name| (*name, self.disc_answer()))
            .collect()
    }

    pub fn anchor_answer_sheet(&mut self) -> Vec<(&'static str, f64)> {
        ANCHOR_INPUT_NAMES
            .iter()
            .map(|name| (*name, self.anchor_rating()))
            .collect()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range_i32(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = i64::from(max) - i64::from(min) + 1;
        let offset = (self.rng.next_u64() % (span as u64)) as i64;
        (i64::from(min) + offset) as i32
    }
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("quadra.db");
    Ok((dir, db_path))
}

pub fn disc_selector_names() -> &'static [&'static str] {
    &DISC_SELECTOR_NAMES
}

pub fn anchor_input_names() -> &'static [&'static str] {
    &ANCHOR_INPUT_NAMES
}

pub fn email_slug(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}
