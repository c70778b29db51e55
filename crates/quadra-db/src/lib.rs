// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod formula;

use crate::formula::{FormulaError, parse_expression};
use anyhow::{Context, Result, anyhow, bail};
use quadra_app::{
    AccessLogEntry, AccessLogEntryId, DashboardCounts, Element, ElementId, ElementKind, ElementSet,
    FormTable, RequestContext, Role, SeriesSpec, SessionUser, SurveyProgress, TEMPLATE_OWNER, User,
    UserId,
};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

pub const APP_NAME: &str = "quadra";

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@quadra.local";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";
const DEFAULT_ADMIN_NAME: &str = "Quadra Admin";
const DEFAULT_ADMIN_COMPANY: &str = "Quadra";

const ELEMENT_COLUMNS: &[&str] = &[
    "id",
    "owner_id",
    "name",
    "kind",
    "expression",
    "message",
    "value",
    "selection_spec",
    "label_spec",
    "col_pos",
    "row_pos",
    "color",
];

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    (
        "users",
        &[
            "id",
            "name",
            "email",
            "password_sha256",
            "role",
            "company",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "access_log",
        &["id", "user_id", "program", "action", "created_at"],
    ),
    ("form_disc_survey", ELEMENT_COLUMNS),
    ("form_disc_results", ELEMENT_COLUMNS),
    ("form_anchors_survey", ELEMENT_COLUMNS),
    ("form_anchors_results", ELEMENT_COLUMNS),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequiredIndex {
    name: &'static str,
    create_sql: &'static str,
}

const REQUIRED_INDEXES: &[RequiredIndex] = &[
    RequiredIndex {
        name: "idx_form_disc_survey_owner_name",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_disc_survey_owner_name ON form_disc_survey (owner_id, name);",
    },
    RequiredIndex {
        name: "idx_form_disc_survey_layout",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_disc_survey_layout ON form_disc_survey (owner_id, row_pos, col_pos);",
    },
    RequiredIndex {
        name: "idx_form_disc_results_owner_name",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_disc_results_owner_name ON form_disc_results (owner_id, name);",
    },
    RequiredIndex {
        name: "idx_form_disc_results_layout",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_disc_results_layout ON form_disc_results (owner_id, row_pos, col_pos);",
    },
    RequiredIndex {
        name: "idx_form_anchors_survey_owner_name",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_anchors_survey_owner_name ON form_anchors_survey (owner_id, name);",
    },
    RequiredIndex {
        name: "idx_form_anchors_survey_layout",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_anchors_survey_layout ON form_anchors_survey (owner_id, row_pos, col_pos);",
    },
    RequiredIndex {
        name: "idx_form_anchors_results_owner_name",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_anchors_results_owner_name ON form_anchors_results (owner_id, name);",
    },
    RequiredIndex {
        name: "idx_form_anchors_results_layout",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_form_anchors_results_layout ON form_anchors_results (owner_id, row_pos, col_pos);",
    },
    RequiredIndex {
        name: "idx_access_log_user",
        create_sql: "CREATE INDEX IF NOT EXISTS idx_access_log_user ON access_log (user_id, created_at);",
    },
];

#[derive(Debug, Clone, Copy)]
struct TemplateElement {
    name: &'static str,
    kind: ElementKind,
    expression: Option<&'static str>,
    message: Option<&'static str>,
    selection: Option<&'static str>,
    labels: Option<&'static str>,
    column: i32,
    row: i32,
    color: Option<&'static str>,
}

impl TemplateElement {
    const fn new(row: i32, column: i32, kind: ElementKind, name: &'static str) -> Self {
        Self {
            name,
            kind,
            expression: None,
            message: None,
            selection: None,
            labels: None,
            column,
            row,
            color: None,
        }
    }

    const fn message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    const fn expression(mut self, expression: &'static str) -> Self {
        self.expression = Some(expression);
        self
    }

    const fn series(mut self, selection: &'static str, labels: &'static str) -> Self {
        self.selection = Some(selection);
        self.labels = Some(labels);
        self
    }

    const fn color(mut self, color: &'static str) -> Self {
        self.color = Some(color);
        self
    }
}

const RATING_SCALE: &str = "0|1|2|3|4";
const RATING_LABELS: &str = "Never|Rarely|Sometimes|Often|Always";

const DISC_SURVEY_TEMPLATE: &[TemplateElement] = &[
    TemplateElement::new(1, 1, ElementKind::Label, "survey_title")
        .message("DISC Behavioral Survey"),
    TemplateElement::new(1, 4, ElementKind::Label, "survey_hint")
        .message("Rate how well each statement describes you."),
    TemplateElement::new(2, 1, ElementKind::Spacer, "gap_intro"),
    TemplateElement::new(3, 1, ElementKind::Label, "heading_d").message("Dominance"),
    TemplateElement::new(4, 1, ElementKind::Selector, "d1")
        .message("I take charge in group situations.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(5, 1, ElementKind::Selector, "d2")
        .message("I push hard to reach ambitious targets.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(6, 1, ElementKind::Selector, "d3")
        .message("I make quick decisions under pressure.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(7, 1, ElementKind::Label, "heading_i").message("Influence"),
    TemplateElement::new(8, 1, ElementKind::Selector, "i1")
        .message("I win people over with enthusiasm.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(9, 1, ElementKind::Selector, "i2")
        .message("I enjoy being the center of attention.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(10, 1, ElementKind::Selector, "i3")
        .message("I talk others into trying new ideas.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(11, 1, ElementKind::Label, "heading_s").message("Steadiness"),
    TemplateElement::new(12, 1, ElementKind::Selector, "s1")
        .message("I prefer steady routines over surprises.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(13, 1, ElementKind::Selector, "s2")
        .message("I stay patient with slow processes.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(14, 1, ElementKind::Selector, "s3")
        .message("I support teammates before pushing my own agenda.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(15, 1, ElementKind::Label, "heading_c").message("Conscientiousness"),
    TemplateElement::new(16, 1, ElementKind::Selector, "c1")
        .message("I double-check details before handing work over.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(17, 1, ElementKind::Selector, "c2")
        .message("I follow rules and standards closely.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(18, 1, ElementKind::Selector, "c3")
        .message("I plan carefully before acting.")
        .series(RATING_SCALE, RATING_LABELS),
    TemplateElement::new(19, 1, ElementKind::Spacer, "gap_scores"),
    TemplateElement::new(20, 1, ElementKind::Formula, "score_d")
        .expression("d1 + d2 + d3")
        .message("Dominance total"),
    TemplateElement::new(21, 1, ElementKind::Formula, "score_i")
        .expression("i1 + i2 + i3")
        .message("Influence total"),
    TemplateElement::new(22, 1, ElementKind::Formula, "score_s")
        .expression("s1 + s2 + s3")
        .message("Steadiness total"),
    TemplateElement::new(23, 1, ElementKind::Formula, "score_c")
        .expression("c1 + c2 + c3")
        .message("Conscientiousness total"),
    TemplateElement::new(24, 1, ElementKind::HorizontalFormula, "score_total")
        .expression("score_d + score_i + score_s + score_c")
        .message("Total points"),
];

const DISC_RESULTS_TEMPLATE: &[TemplateElement] = &[
    TemplateElement::new(1, 1, ElementKind::Label, "results_title")
        .message("DISC Behavioral Assessment"),
    // Shares its name with the score_total lookup so the copy pass fills {value}.
    TemplateElement::new(2, 1, ElementKind::Label, "score_total")
        .message("Total points: {value}"),
    TemplateElement::new(3, 1, ElementKind::Spacer, "gap_header"),
    TemplateElement::new(4, 1, ElementKind::LookupCopy, "score_d").expression("score_d"),
    TemplateElement::new(4, 2, ElementKind::LookupCopy, "score_i").expression("score_i"),
    TemplateElement::new(4, 3, ElementKind::LookupCopy, "score_s").expression("score_s"),
    TemplateElement::new(4, 4, ElementKind::LookupCopy, "score_c").expression("score_c"),
    TemplateElement::new(4, 5, ElementKind::LookupCopy, "score_total").expression("score_total"),
    TemplateElement::new(5, 1, ElementKind::Formula, "pct_d")
        .expression("score_d / score_total * 100"),
    TemplateElement::new(5, 2, ElementKind::Formula, "pct_i")
        .expression("score_i / score_total * 100"),
    TemplateElement::new(5, 3, ElementKind::Formula, "pct_s")
        .expression("score_s / score_total * 100"),
    TemplateElement::new(5, 4, ElementKind::Formula, "pct_c")
        .expression("score_c / score_total * 100"),
    TemplateElement::new(6, 1, ElementKind::Chart, "profile_chart")
        .message("DISC Behavioral Profile")
        .series(
            "score_d|score_i|score_s|score_c",
            "Dominance|Influence|Steadiness|Conscientiousness",
        ),
    TemplateElement::new(6, 4, ElementKind::Chart, "pct_chart")
        .message("Share of total (%)")
        .series("pct_d|pct_i|pct_s|pct_c", "D|I|S|C")
        .color("#53a7a9"),
    TemplateElement::new(7, 1, ElementKind::SummaryTable, "score_summary")
        .message("Score Summary")
        .series(
            "score_d|score_i|score_s|score_c|score_total",
            "Dominance|Influence|Steadiness|Conscientiousness|Total",
        ),
    TemplateElement::new(8, 2, ElementKind::Label, "note_left")
        .message("Scores reflect self-reported behavior, not ability."),
    TemplateElement::new(8, 5, ElementKind::Label, "note_right")
        .message("The narrative compares your two strongest dimensions."),
];

const ANCHORS_SURVEY_TEMPLATE: &[TemplateElement] = &[
    TemplateElement::new(1, 1, ElementKind::Label, "anchors_title")
        .message("Career Anchors Survey"),
    TemplateElement::new(1, 4, ElementKind::Label, "anchors_hint")
        .message("Score each anchor from 0 (not me) to 10 (exactly me)."),
    TemplateElement::new(2, 1, ElementKind::Spacer, "gap_intro"),
    TemplateElement::new(3, 1, ElementKind::Input, "anchor_technical")
        .message("Deep mastery of a technical craft"),
    TemplateElement::new(4, 1, ElementKind::Input, "anchor_managerial")
        .message("Leading people and owning outcomes"),
    TemplateElement::new(5, 1, ElementKind::Input, "anchor_autonomy")
        .message("Working on my own terms"),
    TemplateElement::new(6, 1, ElementKind::Input, "anchor_security")
        .message("Long-term stability and predictability"),
    TemplateElement::new(7, 1, ElementKind::Input, "anchor_creativity")
        .message("Building something new from scratch"),
    TemplateElement::new(8, 1, ElementKind::Input, "anchor_service")
        .message("Helping people and causes that matter"),
    TemplateElement::new(9, 1, ElementKind::Input, "anchor_challenge")
        .message("Cracking problems others call impossible"),
    TemplateElement::new(10, 1, ElementKind::Input, "anchor_lifestyle")
        .message("Keeping work in balance with life"),
    TemplateElement::new(11, 1, ElementKind::Spacer, "gap_total"),
    TemplateElement::new(12, 1, ElementKind::Formula, "anchor_total")
        .expression(
            "anchor_technical + anchor_managerial + anchor_autonomy + anchor_security + anchor_creativity + anchor_service + anchor_challenge + anchor_lifestyle",
        )
        .message("Combined total"),
];

const ANCHORS_RESULTS_TEMPLATE: &[TemplateElement] = &[
    TemplateElement::new(1, 1, ElementKind::Label, "anchors_results_title")
        .message("Career Anchors Assessment"),
    TemplateElement::new(2, 1, ElementKind::Label, "anchor_total")
        .message("Combined total: {value}"),
    TemplateElement::new(3, 1, ElementKind::Spacer, "gap_header"),
    TemplateElement::new(4, 1, ElementKind::LookupCopy, "anchor_technical")
        .expression("anchor_technical"),
    TemplateElement::new(4, 2, ElementKind::LookupCopy, "anchor_managerial")
        .expression("anchor_managerial"),
    TemplateElement::new(4, 3, ElementKind::LookupCopy, "anchor_autonomy")
        .expression("anchor_autonomy"),
    TemplateElement::new(4, 4, ElementKind::LookupCopy, "anchor_security")
        .expression("anchor_security"),
    TemplateElement::new(4, 5, ElementKind::LookupCopy, "anchor_creativity")
        .expression("anchor_creativity"),
    TemplateElement::new(4, 6, ElementKind::LookupCopy, "anchor_service")
        .expression("anchor_service"),
    TemplateElement::new(5, 1, ElementKind::LookupCopy, "anchor_challenge")
        .expression("anchor_challenge"),
    TemplateElement::new(5, 2, ElementKind::LookupCopy, "anchor_lifestyle")
        .expression("anchor_lifestyle"),
    TemplateElement::new(5, 3, ElementKind::LookupCopy, "anchor_total")
        .expression("anchor_total"),
    TemplateElement::new(6, 1, ElementKind::Chart, "anchors_chart")
        .message("Anchor Strengths")
        .series(
            "anchor_technical|anchor_managerial|anchor_autonomy|anchor_security|anchor_creativity|anchor_service|anchor_challenge|anchor_lifestyle",
            "Technical|Managerial|Autonomy|Security|Creativity|Service|Challenge|Lifestyle",
        )
        .color("#4c78a8"),
    TemplateElement::new(7, 1, ElementKind::SummaryTable, "anchors_summary")
        .message("Anchor Summary")
        .series(
            "anchor_technical|anchor_managerial|anchor_autonomy|anchor_security|anchor_creativity|anchor_service|anchor_challenge|anchor_lifestyle|anchor_total",
            "Technical|Managerial|Autonomy|Security|Creativity|Service|Challenge|Lifestyle|Total",
        ),
    TemplateElement::new(8, 2, ElementKind::Label, "anchors_note")
        .message("Anchors describe what you refuse to give up in a career."),
];

const fn template_for(form: FormTable) -> &'static [TemplateElement] {
    match form {
        FormTable::DiscSurvey => DISC_SURVEY_TEMPLATE,
        FormTable::DiscResults => DISC_RESULTS_TEMPLATE,
        FormTable::AnchorsSurvey => ANCHORS_SURVEY_TEMPLATE,
        FormTable::AnchorsResults => ANCHORS_RESULTS_TEMPLATE,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub company: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncOutcome {
    pub copied: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaIssue {
    pub element: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecomputeOutcome {
    pub updated: usize,
    pub issues: Vec<FormulaIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    Applied { rows: usize },
    NotConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    fn run<T>(self, operation: &mut dyn FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation() {
                Err(error) if attempt < attempts && is_busy_error(&error) => {
                    attempt += 1;
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                }
                outcome => return outcome,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

pub fn is_busy_error(error: &rusqlite::Error) -> bool {
    matches!(
        error.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

pub struct Store {
    conn: Connection,
    retry: RetryPolicy,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        // ":memory:" never touches disk, so there is no file to restrict.
        if printable == ":memory:" {
            return Self::open_memory();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        set_private_permissions(path)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry = policy;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }

        ensure_required_indexes(&self.conn)?;

        self.seed_defaults()?;
        Ok(())
    }

    pub fn seed_defaults(&self) -> Result<()> {
        for form in FormTable::ALL {
            let table = form.table_name();
            let count: i64 = self
                .conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE owner_id = ?"),
                    params![TEMPLATE_OWNER.get()],
                    |row| row.get(0),
                )
                .with_context(|| format!("count template rows in {table}"))?;
            if count > 0 {
                continue;
            }

            let insert_sql = format!(
                "
                INSERT INTO {table} (
                  owner_id, name, kind, expression, message,
                  value, selection_spec, label_spec, col_pos, row_pos, color
                ) VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
                "
            );
            for element in template_for(form) {
                self.conn
                    .execute(
                        &insert_sql,
                        params![
                            TEMPLATE_OWNER.get(),
                            element.name,
                            element.kind.as_str(),
                            element.expression,
                            element.message,
                            element.selection,
                            element.labels,
                            element.column,
                            element.row,
                            element.color,
                        ],
                    )
                    .with_context(|| format!("insert template element {}", element.name))?;
            }
        }

        let user_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("count users")?;
        if user_count == 0 {
            self.create_user(&NewUser {
                name: DEFAULT_ADMIN_NAME.to_owned(),
                email: DEFAULT_ADMIN_EMAIL.to_owned(),
                password: DEFAULT_ADMIN_PASSWORD.to_owned(),
                role: Role::Admin,
                company: DEFAULT_ADMIN_COMPANY.to_owned(),
            })?;
        }
        Ok(())
    }

    pub fn create_user(&self, new_user: &NewUser) -> Result<UserId> {
        let now = now_rfc3339()?;
        let digest = checksum_sha256(new_user.password.as_bytes());
        self.with_retry(|| {
            self.conn.execute(
                "
                INSERT INTO users (
                  name, email, password_sha256, role, company, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    new_user.name,
                    new_user.email,
                    digest,
                    new_user.role.as_str(),
                    new_user.company,
                    now,
                    now,
                ],
            )
        })
        .context("insert user")?;

        Ok(UserId::new(self.conn.last_insert_rowid()))
    }

    pub fn get_user(&self, user_id: UserId) -> Result<User> {
        self.conn
            .query_row(
                "
                SELECT id, name, email, role, company, created_at, updated_at
                FROM users
                WHERE id = ?
                ",
                params![user_id.get()],
                map_user,
            )
            .with_context(|| format!("get user {}", user_id.get()))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, name, email, role, company, created_at, updated_at
                FROM users
                ORDER BY name COLLATE NOCASE ASC, id ASC
                ",
            )
            .context("prepare users query")?;
        let rows = stmt.query_map([], map_user).context("query users")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect users")
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<Option<SessionUser>> {
        let digest = checksum_sha256(password.as_bytes());
        self.conn
            .query_row(
                "
                SELECT id, name, email, role, company
                FROM users
                WHERE email = ? AND password_sha256 = ?
                ",
                params![email.trim(), digest],
                |row| {
                    let role_raw: String = row.get(3)?;
                    let role = Role::parse(&role_raw).ok_or_else(|| {
                        to_sql_error(anyhow!(
                            "unknown role {role_raw:?} -- fix the users table and retry"
                        ))
                    })?;
                    Ok(SessionUser {
                        id: UserId::new(row.get(0)?),
                        name: row.get(1)?,
                        email: row.get(2)?,
                        role,
                        company: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("authenticate user")
    }

    pub fn record_access(&self, user_id: UserId, program: &str, action: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.with_retry(|| {
            self.conn.execute(
                "
                INSERT INTO access_log (user_id, program, action, created_at)
                VALUES (?, ?, ?, ?)
                ",
                params![user_id.get(), program, action, now],
            )
        })
        .context("insert access log entry")?;
        Ok(())
    }

    pub fn list_access_log(&self, limit: usize) -> Result<Vec<AccessLogEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, user_id, program, action, created_at
                FROM access_log
                ORDER BY id DESC
                LIMIT ?
                ",
            )
            .context("prepare access log query")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| {
                let created_raw: String = row.get(4)?;
                Ok(AccessLogEntry {
                    id: AccessLogEntryId::new(row.get(0)?),
                    user_id: UserId::new(row.get(1)?),
                    program: row.get(2)?,
                    action: row.get(3)?,
                    created_at: parse_datetime(&created_raw).map_err(to_sql_error)?,
                })
            })
            .context("query access log")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("collect access log")
    }

    pub fn dashboard_counts(&self, owner: UserId) -> Result<DashboardCounts> {
        Ok(DashboardCounts {
            disc: self.survey_progress(&RequestContext::new(owner, FormTable::DiscSurvey))?,
            anchors: self.survey_progress(&RequestContext::new(owner, FormTable::AnchorsSurvey))?,
        })
    }

    pub fn survey_progress(&self, ctx: &RequestContext) -> Result<SurveyProgress> {
        let table = ctx.form.table_name();
        let sql = format!(
            "
            SELECT
              COUNT(*) FILTER (WHERE value IS NOT NULL),
              COUNT(*)
            FROM {table}
            WHERE owner_id = ?
              AND kind IN ('input', 'selector')
            "
        );
        let (answered, total): (i64, i64) = self
            .conn
            .query_row(&sql, params![ctx.owner.get()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .with_context(|| format!("count survey progress in {table}"))?;
        Ok(SurveyProgress {
            answered: usize::try_from(answered).unwrap_or(0),
            total: usize::try_from(total).unwrap_or(0),
        })
    }

    /// Copies the template rows for the context's form unless the owner
    /// already has rows there. The copy happens in one INSERT..SELECT so two
    /// racing sessions cannot both seed.
    pub fn seed_from_template(&self, ctx: &RequestContext) -> Result<usize> {
        let table = ctx.form.table_name();
        let sql = format!(
            "
            INSERT INTO {table} (
              owner_id, name, kind, expression, message,
              value, selection_spec, label_spec, col_pos, row_pos, color
            )
            SELECT
              ?1, name, kind, expression, message,
              value, selection_spec, label_spec, col_pos, row_pos, color
            FROM {table}
            WHERE owner_id = ?2
              AND NOT EXISTS (SELECT 1 FROM {table} WHERE owner_id = ?1)
            ORDER BY id ASC
            "
        );
        let rows = self
            .with_retry(|| {
                self.conn
                    .execute(&sql, params![ctx.owner.get(), TEMPLATE_OWNER.get()])
            })
            .with_context(|| format!("seed {table} from template"))?;
        Ok(rows)
    }

    pub fn load_elements(&self, ctx: &RequestContext) -> Result<ElementSet> {
        let table = ctx.form.table_name();
        let sql = format!(
            "
            SELECT
              id, owner_id, name, kind, expression, message,
              value, selection_spec, label_spec, col_pos, row_pos, color
            FROM {table}
            WHERE owner_id = ?
            ORDER BY row_pos ASC, col_pos ASC, id ASC
            "
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("prepare elements query for {table}"))?;
        let rows = stmt
            .query_map(params![ctx.owner.get()], |row| {
                let kind_raw: String = row.get(3)?;
                let kind = ElementKind::parse(&kind_raw).ok_or_else(|| {
                    to_sql_error(anyhow!(
                        "unknown element kind {kind_raw:?} -- fix the {table} table and retry"
                    ))
                })?;
                let selection: Option<String> = row.get(7)?;
                let labels: Option<String> = row.get(8)?;
                Ok(Element {
                    id: ElementId::new(row.get(0)?),
                    owner: UserId::new(row.get(1)?),
                    name: row.get(2)?,
                    kind,
                    expression: row.get(4)?,
                    message: row.get(5)?,
                    value: row.get(6)?,
                    series: SeriesSpec::parse(selection.as_deref(), labels.as_deref()),
                    column: row.get(9)?,
                    row: row.get(10)?,
                    color: row.get(11)?,
                })
            })
            .with_context(|| format!("query elements in {table}"))?;
        let elements = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("collect elements in {table}"))?;
        Ok(ElementSet::from_rows(elements))
    }

    /// Latest stored value of a named element; a stored NULL reads as absent.
    pub fn get_latest_value(&self, ctx: &RequestContext, name: &str) -> Result<Option<f64>> {
        let table = ctx.form.table_name();
        let sql = format!(
            "
            SELECT value
            FROM {table}
            WHERE owner_id = ? AND name = ?
            ORDER BY id DESC
            LIMIT 1
            "
        );
        let value: Option<Option<f64>> = self
            .conn
            .query_row(&sql, params![ctx.owner.get(), name], |row| row.get(0))
            .optional()
            .with_context(|| format!("read latest value of {name}"))?;
        Ok(value.flatten())
    }

    pub fn set_value(&self, ctx: &RequestContext, name: &str, value: f64) -> Result<()> {
        let table = ctx.form.table_name();
        let sql = format!(
            "
            UPDATE {table}
            SET value = ?
            WHERE id = (
              SELECT id FROM {table}
              WHERE owner_id = ? AND name = ?
              ORDER BY id DESC
              LIMIT 1
            )
            "
        );
        let rows_affected = self
            .with_retry(|| self.conn.execute(&sql, params![value, ctx.owner.get(), name]))
            .with_context(|| format!("update value of {name}"))?;
        if rows_affected == 0 {
            bail!("element {name} not found for this user -- open the form once to seed it and retry");
        }
        Ok(())
    }

    /// Refreshes every lookup-copy element from its source survey. A source
    /// value lands in all of the owner's rows sharing the element name, so
    /// labels that reuse a lookup name pick the value up for {value} display.
    pub fn sync_lookup_copies(&self, ctx: &RequestContext) -> Result<SyncOutcome> {
        let table = ctx.form.table_name();
        let mut outcome = SyncOutcome::default();

        let scan_sql = format!(
            "
            SELECT name, expression
            FROM {table}
            WHERE owner_id = ? AND kind = 'lookup-copy'
            ORDER BY id ASC
            "
        );
        let mut stmt = self
            .conn
            .prepare(&scan_sql)
            .context("prepare lookup-copy scan")?;
        let rows = stmt
            .query_map(params![ctx.owner.get()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .context("scan lookup-copy elements")?;

        // Later rows override earlier ones, so the newest row wins per name.
        let mut sources: BTreeMap<String, Option<String>> = BTreeMap::new();
        for row in rows {
            let (name, expression) = row.context("read lookup-copy element")?;
            sources.insert(name, expression);
        }
        drop(stmt);

        let Some(source_form) = ctx.form.source_form() else {
            for name in sources.keys() {
                outcome
                    .warnings
                    .push(format!("{name} has no source survey to copy from"));
            }
            return Ok(outcome);
        };

        let source_table = source_form.table_name();
        let fetch_sql = format!(
            "
            SELECT value
            FROM {source_table}
            WHERE owner_id = ? AND name = ?
            ORDER BY id DESC
            LIMIT 1
            "
        );
        let update_sql = format!(
            "
            UPDATE {table}
            SET value = ?
            WHERE owner_id = ? AND name = ?
            "
        );

        for (name, expression) in &sources {
            let source_name = expression
                .as_deref()
                .map(str::trim)
                .filter(|reference| !reference.is_empty())
                .unwrap_or(name);
            let found: Option<Option<f64>> = self
                .conn
                .query_row(&fetch_sql, params![ctx.owner.get(), source_name], |row| {
                    row.get(0)
                })
                .optional()
                .with_context(|| format!("look up {source_name} in {source_table}"))?;
            match found {
                Some(value) => {
                    let value = value.unwrap_or(0.0);
                    self.with_retry(|| {
                        self.conn
                            .execute(&update_sql, params![value, ctx.owner.get(), name])
                    })
                    .with_context(|| format!("copy {source_name} into {name}"))?;
                    outcome.copied += 1;
                }
                None => outcome.warnings.push(format!(
                    "{source_name} is not answered in {}",
                    source_form.title()
                )),
            }
        }

        Ok(outcome)
    }

    /// Recomputes formula and horizontal-formula elements in layout order,
    /// writing each result back as soon as it is known. Malformed expressions
    /// and division by zero become issues and store 0 instead of failing the
    /// whole pass.
    pub fn recompute_formulas(&self, ctx: &RequestContext) -> Result<RecomputeOutcome> {
        let table = ctx.form.table_name();
        let list_sql = format!(
            "
            SELECT id, name, expression
            FROM {table}
            WHERE owner_id = ?
              AND kind IN ('formula', 'horizontal-formula')
            ORDER BY row_pos ASC, col_pos ASC, id ASC
            "
        );
        let mut stmt = self
            .conn
            .prepare(&list_sql)
            .context("prepare formula scan")?;
        let formulas = stmt
            .query_map(params![ctx.owner.get()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .context("scan formula elements")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("collect formula elements")?;
        drop(stmt);

        let write_sql = format!(
            "
            UPDATE {table}
            SET value = ?
            WHERE id = ?
            "
        );
        let mut outcome = RecomputeOutcome::default();
        for (id, name, expression) in formulas {
            let value = match self.evaluate_expression(ctx, expression.as_deref())? {
                Ok(value) if value.is_finite() => value,
                Ok(_) => {
                    outcome.issues.push(FormulaIssue {
                        element: name.clone(),
                        detail: "result is not a finite number".to_owned(),
                    });
                    0.0
                }
                Err(error) => {
                    outcome.issues.push(FormulaIssue {
                        element: name.clone(),
                        detail: error.to_string(),
                    });
                    0.0
                }
            };
            self.with_retry(|| self.conn.execute(&write_sql, params![value, id]))
                .with_context(|| format!("store computed value for {name}"))?;
            outcome.updated += 1;
        }

        Ok(outcome)
    }

    pub fn reset_values(&self, ctx: &RequestContext, confirmed: bool) -> Result<ResetOutcome> {
        if !confirmed {
            return Ok(ResetOutcome::NotConfirmed);
        }
        let table = ctx.form.table_name();
        let sql = format!(
            "
            UPDATE {table}
            SET value = 0.0
            WHERE owner_id = ?
              AND value IS NOT NULL
              AND kind IN ('input', 'formula', 'horizontal-formula')
            "
        );
        let rows = self
            .with_retry(|| self.conn.execute(&sql, params![ctx.owner.get()]))
            .with_context(|| format!("reset values in {table}"))?;
        Ok(ResetOutcome::Applied { rows })
    }

    pub fn seed_demo_data(&self) -> Result<()> {
        let maya = self.create_user(&NewUser {
            name: "Maya Torres".to_owned(),
            email: "maya@example.com".to_owned(),
            password: "demo".to_owned(),
            role: Role::Standard,
            company: "Quadra Labs".to_owned(),
        })?;
        let ravi = self.create_user(&NewUser {
            name: "Ravi Patel".to_owned(),
            email: "ravi@example.com".to_owned(),
            password: "demo".to_owned(),
            role: Role::Elevated,
            company: "Quadra Labs".to_owned(),
        })?;

        let disc = RequestContext::new(maya, FormTable::DiscSurvey);
        self.seed_from_template(&disc)?;
        for (name, value) in [
            ("d1", 4.0),
            ("d2", 3.0),
            ("d3", 4.0),
            ("i1", 2.0),
            ("i2", 1.0),
            ("i3", 2.0),
            ("s1", 3.0),
            ("s2", 2.0),
            ("s3", 3.0),
        ] {
            self.set_value(&disc, name, value)?;
        }
        self.recompute_formulas(&disc)?;

        let anchors = RequestContext::new(maya, FormTable::AnchorsSurvey);
        self.seed_from_template(&anchors)?;
        for (name, value) in [
            ("anchor_technical", 8.0),
            ("anchor_autonomy", 7.0),
            ("anchor_challenge", 9.0),
            ("anchor_lifestyle", 5.0),
        ] {
            self.set_value(&anchors, name, value)?;
        }
        self.recompute_formulas(&anchors)?;

        self.record_access(maya, "disc_survey", "answered demo survey")?;
        self.record_access(ravi, "monitor", "reviewed demo data")?;
        Ok(())
    }

    /// Parses and evaluates an expression for the context's owner. The outer
    /// result carries storage failures; the inner one carries soft formula
    /// problems the caller reports without aborting.
    fn evaluate_expression(
        &self,
        ctx: &RequestContext,
        expression: Option<&str>,
    ) -> Result<std::result::Result<f64, FormulaError>> {
        let raw = expression.unwrap_or("");
        let expr = match parse_expression(raw) {
            Ok(expr) => expr,
            Err(error) => return Ok(Err(error)),
        };

        let mut resolved: BTreeMap<(Option<String>, String), f64> = BTreeMap::new();
        for cell in expr.references() {
            let key = (cell.table.clone(), cell.name.clone());
            if resolved.contains_key(&key) {
                continue;
            }
            let form = match cell.table.as_deref() {
                None => ctx.form,
                Some(table_key) => match FormTable::parse(table_key) {
                    Some(form) => form,
                    None => return Ok(Err(FormulaError::UnknownTable(table_key.to_owned()))),
                },
            };
            let value = self
                .get_latest_value(&RequestContext::new(ctx.owner, form), &cell.name)?
                .unwrap_or(0.0);
            resolved.insert(key, value);
        }

        Ok(expr.evaluate(&mut |cell| {
            resolved
                .get(&(cell.table.clone(), cell.name.clone()))
                .copied()
                .unwrap_or(0.0)
        }))
    }

    fn with_retry<T>(&self, mut operation: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
        match self.retry.run(&mut operation) {
            Err(error) if is_busy_error(&error) => {
                Err(anyhow!(error)).with_context(|| {
                    format!(
                        "database stayed busy after {} attempts -- close other quadra sessions and retry",
                        self.retry.max_attempts.max(1)
                    )
                })
            }
            outcome => outcome.map_err(Into::into),
        }
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("QUADRA_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set QUADRA_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("quadra.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_raw: String = row.get(3)?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        to_sql_error(anyhow!(
            "unknown role {role_raw:?} -- fix the users table and retry"
        ))
    })?;
    let created_raw: String = row.get(5)?;
    let updated_raw: String = row.get(6)?;
    Ok(User {
        id: UserId::new(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        role,
        company: row.get(4)?,
        created_at: parse_datetime(&created_raw).map_err(to_sql_error)?,
        updated_at: parse_datetime(&updated_raw).map_err(to_sql_error)?,
    })
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        if !table_exists(conn, table)? {
            bail!(
                "database is missing required table `{table}`; use a quadra-compatible database or migrate first"
            );
        }

        let columns = table_columns(conn, table)?;
        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();

        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing required columns: {}; run migration before launching",
                missing.join(", ")
            );
        }
    }

    Ok(())
}

fn ensure_required_indexes(conn: &Connection) -> Result<()> {
    for index in REQUIRED_INDEXES {
        conn.execute_batch(index.create_sql)
            .with_context(|| format!("ensure required index `{}`", index.name))?;
    }

    let existing_indexes = index_names(conn)?;
    let missing = REQUIRED_INDEXES
        .iter()
        .filter(|index| !existing_indexes.contains(index.name))
        .map(|index| index.name)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "database is missing required indexes: {}; run migration before launching",
            missing.join(", ")
        );
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "
            SELECT EXISTS(
              SELECT 1
              FROM sqlite_master
              WHERE type = 'table' AND name = ?
            )
            ",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("check table existence for {table}"))?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    let names = rows
        .collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))?;
    Ok(names)
}

fn index_names(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(
            "
            SELECT name
            FROM sqlite_master
            WHERE type = 'index'
              AND name NOT LIKE 'sqlite_%'
            ORDER BY name ASC
            ",
        )
        .context("prepare index names query")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("query index names")?;
    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .context("collect index names")
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

fn parse_datetime(raw: &str) -> Result<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(value);
    }

    // Hand-edited rows sometimes carry the sqlite CURRENT_TIMESTAMP shape.
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(value.assume_utc());
    }

    bail!("unsupported datetime format {raw:?}")
}

fn to_sql_error(error: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            error.to_string(),
        )),
    )
}

fn checksum_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut output = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

fn set_private_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)
            .with_context(|| format!("set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD, FormTable, RetryPolicy, Store, template_for,
    };
    use anyhow::Result;
    use quadra_app::{Role, TEMPLATE_OWNER};
    use rusqlite::params;

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(5),
            Some("database is locked".to_owned()),
        )
    }

    #[test]
    fn bootstrap_seeds_templates_and_admin() -> Result<()> {
        let store = Store::open_memory()?;
        store.bootstrap()?;

        for form in FormTable::ALL {
            let count: i64 = store.raw_connection().query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE owner_id = ?",
                    form.table_name()
                ),
                params![TEMPLATE_OWNER.get()],
                |row| row.get(0),
            )?;
            assert_eq!(count as usize, template_for(form).len(), "form={form:?}");
        }

        let admin = store
            .authenticate(DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD)?
            .expect("default admin should authenticate");
        assert_eq!(admin.role, Role::Admin);
        Ok(())
    }

    #[test]
    fn bootstrap_is_idempotent() -> Result<()> {
        let store = Store::open_memory()?;
        store.bootstrap()?;
        store.bootstrap()?;

        let count: i64 = store.raw_connection().query_row(
            "SELECT COUNT(*) FROM form_disc_survey WHERE owner_id = ?",
            params![TEMPLATE_OWNER.get()],
            |row| row.get(0),
        )?;
        assert_eq!(
            count as usize,
            template_for(FormTable::DiscSurvey).len()
        );

        let users: i64 =
            store
                .raw_connection()
                .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        assert_eq!(users, 1);
        Ok(())
    }

    #[test]
    fn retry_policy_retries_busy_operations() {
        let policy = RetryPolicy::immediate(3);
        let mut attempts = 0;
        let outcome = policy.run(&mut || {
            attempts += 1;
            if attempts < 3 {
                Err(busy_error())
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(outcome.ok(), Some(3));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn exhausted_retries_surface_an_actionable_error() -> Result<()> {
        let mut store = Store::open_memory()?;
        store.set_retry_policy(RetryPolicy::immediate(2));

        let mut attempts = 0;
        let error = store
            .with_retry(|| -> rusqlite::Result<()> {
                attempts += 1;
                Err(busy_error())
            })
            .expect_err("busy errors should not resolve to success");
        assert_eq!(attempts, 2);
        assert!(
            error
                .to_string()
                .contains("close other quadra sessions and retry")
        );
        Ok(())
    }
}
