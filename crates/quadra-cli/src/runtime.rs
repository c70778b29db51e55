// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use quadra_app::{
    AccessLogEntry, DashboardCounts, ElementKind, ElementSet, LoginFormInput, RequestContext,
    SeriesSpec, SessionUser, SurveyValueFormInput, UserId, format_score,
};
use quadra_db::{ResetOutcome, Store};
use quadra_report::{
    DimensionScore, ReportBar, ReportChart, ReportContent, ReportRow, ReportTable, analyze_profile,
    render_report,
};
use std::fs;
use std::path::PathBuf;
use time::OffsetDateTime;

// Caption marker of the chart row that carries the dimension scores.
const PROFILE_CHART_MARKER: &str = "Behavioral Profile";

pub struct DbRuntime<'a> {
    store: &'a Store,
    knowledge_path: PathBuf,
    report_dir: PathBuf,
}

impl<'a> DbRuntime<'a> {
    pub fn new(store: &'a Store, knowledge_path: PathBuf, report_dir: PathBuf) -> Self {
        Self {
            store,
            knowledge_path,
            report_dir,
        }
    }

    /// Seeds the form on first access, pulls lookup copies from the source
    /// survey, and recomputes formulas so every load sees current values.
    fn refresh_form(&self, ctx: &RequestContext) -> Result<ElementSet> {
        self.store.seed_from_template(ctx)?;
        if let Some(source) = ctx.form.source_form() {
            let source_ctx = RequestContext::new(ctx.owner, source);
            self.store.seed_from_template(&source_ctx)?;
            self.store.recompute_formulas(&source_ctx)?;
            self.store.sync_lookup_copies(ctx)?;
        }
        self.store.recompute_formulas(ctx)?;
        self.store.load_elements(ctx)
    }
}

impl quadra_tui::AppRuntime for DbRuntime<'_> {
    fn authenticate(&mut self, input: &LoginFormInput) -> Result<Option<SessionUser>> {
        input.validate()?;
        self.store.authenticate(&input.email, &input.password)
    }

    fn record_access(&mut self, user_id: UserId, action: &str) -> Result<()> {
        self.store
            .record_access(user_id, quadra_db::APP_NAME, action)
    }

    fn load_progress(&mut self, owner: UserId) -> Result<DashboardCounts> {
        self.store.dashboard_counts(owner)
    }

    fn load_elements(&mut self, ctx: &RequestContext) -> Result<ElementSet> {
        self.refresh_form(ctx)
    }

    fn submit_value(&mut self, ctx: &RequestContext, input: &SurveyValueFormInput) -> Result<()> {
        let value = input.parsed_value()?;
        self.store.set_value(ctx, &input.element, value)
    }

    fn load_analysis(&mut self, ctx: &RequestContext) -> Result<String> {
        let elements = self.store.load_elements(ctx)?;
        let scores = profile_scores(&elements)?;
        let knowledge = fs::read_to_string(&self.knowledge_path).with_context(|| {
            format!("read knowledge file {}", self.knowledge_path.display())
        })?;
        analyze_profile(&scores, &knowledge)
    }

    fn export_report(&mut self, ctx: &RequestContext) -> Result<PathBuf> {
        if !ctx.form.is_results() {
            bail!("report export runs from a results form");
        }
        let elements = self.refresh_form(ctx)?;
        let user = self.store.get_user(ctx.owner)?;
        let now = OffsetDateTime::now_utc();

        let content = ReportContent {
            title: ctx.form.title().to_owned(),
            subject: user.name,
            company: user.company,
            generated_at: display_stamp(now),
            tables: report_tables(&elements),
            charts: report_charts(&elements),
        };

        let file_name = format!(
            "{}-{}.pdf",
            ctx.form.as_str().replace('_', "-"),
            file_stamp(now)
        );
        let path = self.report_dir.join(file_name);
        render_report(&content, &path)?;
        Ok(path)
    }

    fn reset_values(&mut self, ctx: &RequestContext, confirmed: bool) -> Result<Option<usize>> {
        match self.store.reset_values(ctx, confirmed)? {
            ResetOutcome::Applied { rows } => Ok(Some(rows)),
            ResetOutcome::NotConfirmed => Ok(None),
        }
    }

    fn load_access_log(&mut self, limit: usize) -> Result<Vec<AccessLogEntry>> {
        self.store.list_access_log(limit)
    }
}

/// Turns the profile chart's series into ranked dimension scores. The chart
/// is found by its caption marker; the letter for each dimension is the first
/// character of its bar label.
fn profile_scores(elements: &ElementSet) -> Result<Vec<DimensionScore>> {
    let pairs = elements
        .iter()
        .find_map(|element| match (element.kind, &element.series) {
            (ElementKind::Chart, SeriesSpec::Pairs(pairs))
                if element
                    .message
                    .as_deref()
                    .is_some_and(|message| message.contains(PROFILE_CHART_MARKER)) =>
            {
                Some(pairs)
            }
            _ => None,
        })
        .ok_or_else(|| anyhow!("this form has no behavioral profile chart to analyze"))?;

    Ok(pairs
        .iter()
        .map(|pair| DimensionScore {
            letter: pair
                .label
                .chars()
                .next()
                .map(|first| first.to_ascii_uppercase().to_string())
                .unwrap_or_default(),
            label: pair.label.clone(),
            value: elements.value(&pair.name).unwrap_or(0.0),
        })
        .collect())
}

fn report_tables(elements: &ElementSet) -> Vec<ReportTable> {
    elements
        .iter()
        .filter(|element| element.kind == ElementKind::SummaryTable)
        .filter_map(|element| match &element.series {
            SeriesSpec::Pairs(pairs) => Some(ReportTable {
                title: element
                    .message
                    .clone()
                    .unwrap_or_else(|| element.name.clone()),
                rows: pairs
                    .iter()
                    .map(|pair| ReportRow {
                        label: pair.label.clone(),
                        value: format_score(elements.value(&pair.name)),
                    })
                    .collect(),
            }),
            _ => None,
        })
        .collect()
}

fn report_charts(elements: &ElementSet) -> Vec<ReportChart> {
    elements
        .iter()
        .filter(|element| element.kind == ElementKind::Chart)
        .filter_map(|element| match &element.series {
            SeriesSpec::Pairs(pairs) => Some(ReportChart {
                title: element
                    .message
                    .clone()
                    .unwrap_or_else(|| element.name.clone()),
                color: element.color.clone(),
                bars: pairs
                    .iter()
                    .map(|pair| ReportBar {
                        label: pair.label.clone(),
                        value: elements.value(&pair.name).unwrap_or(0.0),
                    })
                    .collect(),
            }),
            _ => None,
        })
        .collect()
}

fn display_stamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute()
    )
}

fn file_stamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

#[cfg(test)]
mod tests {
    use super::DbRuntime;
    use anyhow::Result;
    use quadra_app::{FormTable, LoginFormInput, RequestContext, Role, SurveyValueFormInput, UserId};
    use quadra_db::{DEFAULT_ADMIN_EMAIL, DEFAULT_ADMIN_PASSWORD, NewUser, Store};
    use quadra_tui::AppRuntime;

    const KNOWLEDGE: &str = r#"## DISC Dimension Profiles

### Profile D - Dominance

Direct and results-driven under pressure.

- **Strengths:** Takes initiative, Decides quickly
- **Limitations:** Impatient with process

## Combined Profiles

### D/I - The Driver

Pushes for results and pulls people along.
"#;

    const ANSWERS: [(&str, f64); 12] = [
        ("d1", 4.0),
        ("d2", 4.0),
        ("d3", 4.0),
        ("i1", 3.0),
        ("i2", 3.0),
        ("i3", 3.0),
        ("s1", 2.0),
        ("s2", 2.0),
        ("s3", 2.0),
        ("c1", 1.0),
        ("c2", 1.0),
        ("c3", 1.0),
    ];

    fn demo_store() -> Result<Store> {
        let store = Store::open_memory()?;
        store.bootstrap()?;
        Ok(store)
    }

    fn test_user(store: &Store) -> Result<UserId> {
        store.create_user(&NewUser {
            name: "Maya Torres".to_owned(),
            email: "maya@example.com".to_owned(),
            password: "pw-1234".to_owned(),
            role: Role::Standard,
            company: "Quadra Labs".to_owned(),
        })
    }

    fn test_runtime<'a>(
        store: &'a Store,
        temp: &tempfile::TempDir,
    ) -> Result<DbRuntime<'a>> {
        let knowledge_path = temp.path().join("knowledge.md");
        std::fs::write(&knowledge_path, KNOWLEDGE)?;
        Ok(DbRuntime::new(
            store,
            knowledge_path,
            temp.path().to_path_buf(),
        ))
    }

    fn answer_survey(runtime: &mut DbRuntime<'_>, ctx: &RequestContext) -> Result<()> {
        runtime.load_elements(ctx)?;
        for (name, value) in ANSWERS {
            runtime.submit_value(
                ctx,
                &SurveyValueFormInput {
                    form: ctx.form,
                    element: name.to_owned(),
                    raw_value: value.to_string(),
                },
            )?;
        }
        Ok(())
    }

    #[test]
    fn authenticate_validates_before_touching_the_store() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;

        let error = runtime
            .authenticate(&LoginFormInput {
                email: String::new(),
                password: "x".to_owned(),
            })
            .expect_err("blank email should fail validation");
        assert!(error.to_string().contains("email is required"));

        let session = runtime
            .authenticate(&LoginFormInput {
                email: DEFAULT_ADMIN_EMAIL.to_owned(),
                password: DEFAULT_ADMIN_PASSWORD.to_owned(),
            })?
            .expect("seeded admin should authenticate");
        assert_eq!(session.role, Role::Admin);
        Ok(())
    }

    #[test]
    fn survey_answers_flow_into_results_scores() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;
        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        answer_survey(&mut runtime, &survey)?;

        let results = RequestContext::new(owner, FormTable::DiscResults);
        let elements = runtime.load_elements(&results)?;
        assert_eq!(elements.value("score_d"), Some(12.0));
        assert_eq!(elements.value("score_i"), Some(9.0));
        assert_eq!(elements.value("score_total"), Some(30.0));
        let pct_d = elements.value("pct_d").expect("pct_d is computed");
        assert!((pct_d - 40.0).abs() < 1e-9, "pct_d was {pct_d}");
        Ok(())
    }

    #[test]
    fn results_open_before_the_survey_score_zero() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;

        let results = RequestContext::new(owner, FormTable::DiscResults);
        let elements = runtime.load_elements(&results)?;
        assert_eq!(elements.value("score_total"), Some(0.0));
        Ok(())
    }

    #[test]
    fn analysis_ranks_the_two_strongest_dimensions() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;
        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        answer_survey(&mut runtime, &survey)?;

        let results = RequestContext::new(owner, FormTable::DiscResults);
        runtime.load_elements(&results)?;
        let narrative = runtime.load_analysis(&results)?;
        assert!(
            narrative.starts_with("Dominant profile: Dominance (D) with Influence (I)"),
            "unexpected narrative: {narrative}"
        );
        assert!(narrative.contains("The Driver"));
        Ok(())
    }

    #[test]
    fn analysis_needs_the_profile_chart() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;

        // The anchors chart plots anchor ratings, not DISC dimensions.
        let results = RequestContext::new(owner, FormTable::AnchorsResults);
        runtime.load_elements(&results)?;
        let error = runtime
            .load_analysis(&results)
            .expect_err("anchors results carry no profile chart");
        assert!(error.to_string().contains("behavioral profile chart"));
        Ok(())
    }

    #[test]
    fn missing_knowledge_file_is_a_named_error() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let owner = test_user(&store)?;
        let mut runtime = DbRuntime::new(
            &store,
            temp.path().join("absent.md"),
            temp.path().to_path_buf(),
        );

        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        answer_survey(&mut runtime, &survey)?;
        let results = RequestContext::new(owner, FormTable::DiscResults);
        runtime.load_elements(&results)?;

        let error = runtime
            .load_analysis(&results)
            .expect_err("missing knowledge file should fail");
        assert!(error.to_string().contains("absent.md"));
        Ok(())
    }

    #[test]
    fn export_writes_a_pdf_into_the_report_dir() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;
        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        answer_survey(&mut runtime, &survey)?;

        let results = RequestContext::new(owner, FormTable::DiscResults);
        let path = runtime.export_report(&results)?;
        assert!(path.starts_with(temp.path()));
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("report file name");
        assert!(file_name.starts_with("disc-results-"));
        assert!(file_name.ends_with(".pdf"));
        assert!(std::fs::metadata(&path)?.len() > 0);
        Ok(())
    }

    #[test]
    fn export_rejects_survey_forms() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;

        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        let error = runtime
            .export_report(&survey)
            .expect_err("survey export should fail");
        assert!(error.to_string().contains("results form"));
        Ok(())
    }

    #[test]
    fn reset_applies_only_when_confirmed() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;
        let survey = RequestContext::new(owner, FormTable::DiscSurvey);
        answer_survey(&mut runtime, &survey)?;
        runtime.load_elements(&survey)?;

        assert_eq!(runtime.reset_values(&survey, false)?, None);
        assert_eq!(store.get_latest_value(&survey, "score_d")?, Some(12.0));

        // The five formula rows reset; selector answers stay.
        assert_eq!(runtime.reset_values(&survey, true)?, Some(5));
        assert_eq!(store.get_latest_value(&survey, "score_d")?, Some(0.0));
        assert_eq!(store.get_latest_value(&survey, "d1")?, Some(4.0));
        Ok(())
    }

    #[test]
    fn access_log_records_the_program_name() -> Result<()> {
        let store = demo_store()?;
        let temp = tempfile::tempdir()?;
        let mut runtime = test_runtime(&store, &temp)?;
        let owner = test_user(&store)?;

        runtime.record_access(owner, "signed in")?;
        let entries = runtime.load_access_log(5)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_id, owner);
        assert_eq!(entries[0].program, "quadra");
        assert_eq!(entries[0].action, "signed in");
        Ok(())
    }
}
