// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use quadra_app::{
    AccessLogEntry, AppCommand, AppEvent, AppMode, AppState, DashboardCounts, Element, ElementKind,
    ElementSet, FormTable, LoginFormInput, RequestContext, SeriesSpec, SessionUser,
    SurveyValueFormInput, TabKind, UserId, format_score, resolve_message,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Tabs};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

const PAGE_WIDTH: usize = 76;
const COLUMN_WIDTH: usize = 37;
const BAR_WIDTH: usize = 40;
const BAR_LABEL_WIDTH: usize = 18;
const MIN_COLUMN: i32 = 1;
const MAX_COLUMN: i32 = 6;
const COLUMN_SPLIT: i32 = 3;
const CHARTS_PER_PAGE: usize = 2;
const HALF_PAGE_LINES: u16 = 10;
const ACCESS_LOG_LIMIT: usize = 100;
const CURSOR_MARK: &str = "▶ ";
const ERROR_MARK: &str = "!!";

pub trait AppRuntime {
    fn authenticate(&mut self, input: &LoginFormInput) -> Result<Option<SessionUser>>;
    fn record_access(&mut self, user_id: UserId, action: &str) -> Result<()>;
    fn load_progress(&mut self, owner: UserId) -> Result<DashboardCounts>;
    fn load_elements(&mut self, ctx: &RequestContext) -> Result<ElementSet>;
    fn submit_value(&mut self, ctx: &RequestContext, input: &SurveyValueFormInput) -> Result<()>;
    fn load_analysis(&mut self, ctx: &RequestContext) -> Result<String>;
    fn export_report(&mut self, ctx: &RequestContext) -> Result<PathBuf>;
    fn reset_values(&mut self, ctx: &RequestContext, confirmed: bool) -> Result<Option<usize>>;
    fn load_access_log(&mut self, limit: usize) -> Result<Vec<AccessLogEntry>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartBar {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartWidget {
    pub title: String,
    pub bars: Vec<ChartBar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWidget {
    pub title: String,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputWidget {
    pub ordinal: usize,
    pub prompt: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorWidget {
    pub ordinal: usize,
    pub prompt: String,
    pub options: Vec<(f64, String)>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    Label(String),
    Spacer,
    Chart(ChartWidget),
    SummaryTable(TableWidget),
    Input(InputWidget),
    Selector(SelectorWidget),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetResult {
    Rendered(Widget),
    Failed { name: String, detail: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageBlock {
    Table(WidgetResult),
    Chart(WidgetResult),
    PageBreak,
    Columns {
        left: Vec<WidgetResult>,
        right: Vec<WidgetResult>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditTarget {
    pub name: String,
    pub prompt: String,
    pub options: Vec<(f64, String)>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub title: String,
    pub blocks: Vec<PageBlock>,
    pub editable: Vec<EditTarget>,
}

/// Builds the display model for one form table. Tables come first at full
/// width, charts follow with a page-break marker after every second chart,
/// and everything else splits into two columns on the `column` field. A bad
/// widget turns into an inline error without taking the page down.
pub fn build_page(title: &str, elements: &ElementSet) -> PageView {
    let mut tables = Vec::new();
    let mut charts = Vec::new();
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut editable = Vec::new();

    for element in elements.iter() {
        if element.column < MIN_COLUMN || element.column > MAX_COLUMN {
            let failed = WidgetResult::Failed {
                name: element.name.clone(),
                detail: format!(
                    "column {} is outside the {MIN_COLUMN}..{MAX_COLUMN} layout grid",
                    element.column
                ),
            };
            match element.kind {
                ElementKind::SummaryTable => tables.push(failed),
                ElementKind::Chart => charts.push(failed),
                _ => left.push(failed),
            }
            continue;
        }

        match element.kind {
            ElementKind::SummaryTable => tables.push(build_table(element, elements)),
            ElementKind::Chart => charts.push(build_chart(element, elements)),
            ElementKind::LookupCopy => {}
            ElementKind::Label | ElementKind::Formula | ElementKind::HorizontalFormula => {
                let template = element.message.as_deref().unwrap_or(&element.name);
                let widget = Widget::Label(resolve_message(template, element.value));
                push_column(&mut left, &mut right, element, WidgetResult::Rendered(widget));
            }
            ElementKind::Spacer => {
                push_column(
                    &mut left,
                    &mut right,
                    element,
                    WidgetResult::Rendered(Widget::Spacer),
                );
            }
            ElementKind::Input => {
                let widget = Widget::Input(InputWidget {
                    ordinal: editable.len(),
                    prompt: prompt_for(element),
                    value: element.value,
                });
                editable.push(EditTarget {
                    name: element.name.clone(),
                    prompt: prompt_for(element),
                    options: Vec::new(),
                    value: element.value,
                });
                push_column(&mut left, &mut right, element, WidgetResult::Rendered(widget));
            }
            ElementKind::Selector => {
                if let SeriesSpec::Mismatched { names, labels } = element.series {
                    push_column(
                        &mut left,
                        &mut right,
                        element,
                        mismatch_error(&element.name, names, labels),
                    );
                    continue;
                }
                let options = element.series.options();
                let widget = Widget::Selector(SelectorWidget {
                    ordinal: editable.len(),
                    prompt: prompt_for(element),
                    options: options.clone(),
                    value: element.value,
                });
                editable.push(EditTarget {
                    name: element.name.clone(),
                    prompt: prompt_for(element),
                    options,
                    value: element.value,
                });
                push_column(&mut left, &mut right, element, WidgetResult::Rendered(widget));
            }
        }
    }

    let mut blocks: Vec<PageBlock> = tables.into_iter().map(PageBlock::Table).collect();
    let mut chart_count = 0usize;
    for chart in charts {
        let rendered = matches!(chart, WidgetResult::Rendered(_));
        blocks.push(PageBlock::Chart(chart));
        if rendered {
            chart_count += 1;
            if chart_count % CHARTS_PER_PAGE == 0 {
                blocks.push(PageBlock::PageBreak);
            }
        }
    }
    if !left.is_empty() || !right.is_empty() {
        blocks.push(PageBlock::Columns { left, right });
    }

    PageView {
        title: title.to_owned(),
        blocks,
        editable,
    }
}

fn push_column(
    left: &mut Vec<WidgetResult>,
    right: &mut Vec<WidgetResult>,
    element: &Element,
    result: WidgetResult,
) {
    if element.column <= COLUMN_SPLIT {
        left.push(result);
    } else {
        right.push(result);
    }
}

fn prompt_for(element: &Element) -> String {
    element
        .message
        .clone()
        .unwrap_or_else(|| element.name.clone())
}

fn mismatch_error(name: &str, names: usize, labels: usize) -> WidgetResult {
    WidgetResult::Failed {
        name: name.to_owned(),
        detail: format!("selection/label lengths differ ({names} names, {labels} labels)"),
    }
}

fn build_chart(element: &Element, elements: &ElementSet) -> WidgetResult {
    let pairs = match &element.series {
        SeriesSpec::Pairs(pairs) if !pairs.is_empty() => pairs,
        SeriesSpec::Pairs(_) | SeriesSpec::Absent => {
            return WidgetResult::Failed {
                name: element.name.clone(),
                detail: "chart has no selection/label lists".to_owned(),
            };
        }
        SeriesSpec::Mismatched { names, labels } => {
            return mismatch_error(&element.name, *names, *labels);
        }
    };

    let bars = pairs
        .iter()
        .map(|pair| ChartBar {
            label: pair.label.clone(),
            value: elements.value(&pair.name).unwrap_or(0.0),
        })
        .collect();
    WidgetResult::Rendered(Widget::Chart(ChartWidget {
        title: prompt_for(element),
        bars,
    }))
}

fn build_table(element: &Element, elements: &ElementSet) -> WidgetResult {
    let pairs = match &element.series {
        SeriesSpec::Pairs(pairs) if !pairs.is_empty() => pairs,
        SeriesSpec::Pairs(_) | SeriesSpec::Absent => {
            return WidgetResult::Failed {
                name: element.name.clone(),
                detail: "table has no selection/label lists".to_owned(),
            };
        }
        SeriesSpec::Mismatched { names, labels } => {
            return mismatch_error(&element.name, *names, *labels);
        }
    };

    let rows = pairs
        .iter()
        .map(|pair| TableRow {
            label: pair.label.clone(),
            value: format_score(elements.value(&pair.name)),
        })
        .collect();
    WidgetResult::Rendered(Widget::SummaryTable(TableWidget {
        title: prompt_for(element),
        rows,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LoginField {
    #[default]
    Email,
    Password,
}

impl LoginField {
    const fn other(self) -> Self {
        match self {
            Self::Email => Self::Password,
            Self::Password => Self::Email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct LoginUiState {
    email: String,
    password: String,
    field: LoginField,
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct ResetUiState {
    cursor: usize,
    armed: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum EditUiState {
    Input {
        name: String,
        prompt: String,
        buffer: String,
    },
    Selector {
        name: String,
        prompt: String,
        options: Vec<(f64, String)>,
        cursor: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
struct ViewData {
    counts: DashboardCounts,
    page: Option<PageView>,
    analysis: Option<String>,
    selection: usize,
    scroll: u16,
    edit: Option<EditUiState>,
    login: LoginUiState,
    reset: ResetUiState,
    access_log: Vec<AccessLogEntry>,
    help_visible: bool,
    status_token: u64,
}

pub fn run_app<R: AppRuntime>(state: &mut AppState, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    if state.session.is_some()
        && let Err(error) = refresh_view_data(state, runtime, &mut view_data)
    {
        state.dispatch(AppCommand::SetStatus(format!("load failed: {error}")));
    }

    let mut result = Ok(());
    loop {
        process_internal_events(state, &view_data, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, state, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event {
            match event::read().context("read event")? {
                Event::Key(key) => {
                    if handle_key_event(state, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events(state: &mut AppState, view_data: &ViewData, rx: &Receiver<InternalEvent>) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                state.dispatch(AppCommand::ClearStatus);
            }
            InternalEvent::ClearStatus { .. } => {}
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(4));
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    state: &mut AppState,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    state.dispatch(AppCommand::SetStatus(message.into()));
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn log_access<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    user_id: UserId,
    action: &str,
) {
    if let Err(error) = runtime.record_access(user_id, action) {
        emit_status(
            state,
            view_data,
            internal_tx,
            format!("access log write failed: {error}"),
        );
    }
}

fn handle_key_event<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view_data.help_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
            view_data.help_visible = false;
        }
        return false;
    }

    match state.mode {
        AppMode::Login => handle_login_key(state, runtime, view_data, internal_tx, key),
        AppMode::Edit => {
            handle_edit_key(state, runtime, view_data, internal_tx, key);
            false
        }
        AppMode::Nav => {
            handle_nav_key(state, runtime, view_data, internal_tx, key);
            false
        }
    }
}

fn handle_login_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Down | KeyCode::Up => {
            view_data.login.field = view_data.login.field.other();
        }
        KeyCode::Backspace => {
            match view_data.login.field {
                LoginField::Email => view_data.login.email.pop(),
                LoginField::Password => view_data.login.password.pop(),
            };
        }
        KeyCode::Enter => submit_login(state, runtime, view_data, internal_tx),
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            match view_data.login.field {
                LoginField::Email => view_data.login.email.push(ch),
                LoginField::Password => view_data.login.password.push(ch),
            }
        }
        _ => {}
    }
    false
}

fn submit_login<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let input = LoginFormInput {
        email: view_data.login.email.trim().to_owned(),
        password: view_data.login.password.clone(),
    };
    if let Err(error) = input.validate() {
        view_data.login.error = Some(error.to_string());
        return;
    }

    match runtime.authenticate(&input) {
        Ok(Some(user)) => {
            let user_id = user.id;
            view_data.login = LoginUiState::default();
            dispatch_and_refresh(state, runtime, view_data, AppCommand::SignIn(user), internal_tx);
            log_access(state, runtime, view_data, internal_tx, user_id, "signed in");
        }
        Ok(None) => {
            view_data.login.error = Some(
                "email or password is incorrect -- check the account details and retry".to_owned(),
            );
        }
        Err(error) => view_data.login.error = Some(format!("sign-in failed: {error}")),
    }
}

fn handle_nav_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match (key.code, key.modifiers) {
        (KeyCode::Char('?'), _) => view_data.help_visible = true,
        (KeyCode::Char('f'), KeyModifiers::NONE) | (KeyCode::Right, _) | (KeyCode::Tab, _) => {
            dispatch_and_refresh(state, runtime, view_data, AppCommand::NextTab, internal_tx);
        }
        (KeyCode::Char('b'), KeyModifiers::NONE) | (KeyCode::Left, _) | (KeyCode::BackTab, _) => {
            dispatch_and_refresh(state, runtime, view_data, AppCommand::PrevTab, internal_tx);
        }
        (KeyCode::Esc, _) => sign_out(state, runtime, view_data, internal_tx),
        (KeyCode::Char('r'), KeyModifiers::NONE) => {
            match refresh_view_data(state, runtime, view_data) {
                Ok(()) => emit_status(state, view_data, internal_tx, "reloaded"),
                Err(error) => {
                    emit_status(state, view_data, internal_tx, format!("load failed: {error}"));
                }
            }
        }
        (KeyCode::Char('d'), KeyModifiers::CONTROL) => {
            view_data.scroll = view_data.scroll.saturating_add(HALF_PAGE_LINES);
        }
        (KeyCode::Char('u'), KeyModifiers::CONTROL) => {
            view_data.scroll = view_data.scroll.saturating_sub(HALF_PAGE_LINES);
        }
        (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => {
            move_selection(state, view_data, 1);
        }
        (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => {
            move_selection(state, view_data, -1);
        }
        (KeyCode::Char(' '), KeyModifiers::NONE) if state.active_tab == TabKind::Reset => {
            view_data.reset.armed = !view_data.reset.armed;
            let status = if view_data.reset.armed {
                "reset armed"
            } else {
                "reset disarmed"
            };
            emit_status(state, view_data, internal_tx, status);
        }
        (KeyCode::Char('e'), KeyModifiers::NONE) => {
            export_active_report(state, runtime, view_data, internal_tx);
        }
        (KeyCode::Enter, _) => handle_nav_enter(state, runtime, view_data, internal_tx),
        _ => {}
    }
}

fn move_selection(state: &AppState, view_data: &mut ViewData, delta: isize) {
    match state.active_tab {
        TabKind::Reset => {
            let len = FormTable::ALL.len() as isize;
            let current = view_data.reset.cursor as isize;
            view_data.reset.cursor = (current + delta).rem_euclid(len) as usize;
        }
        TabKind::DiscSurvey | TabKind::AnchorsSurvey => {
            let Some(page) = &view_data.page else {
                return;
            };
            if page.editable.is_empty() {
                return;
            }
            let len = page.editable.len() as isize;
            let current = view_data.selection as isize;
            view_data.selection = (current + delta).rem_euclid(len) as usize;
        }
        _ => {
            view_data.scroll = if delta > 0 {
                view_data.scroll.saturating_add(1)
            } else {
                view_data.scroll.saturating_sub(1)
            };
        }
    }
}

fn handle_nav_enter<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    match state.active_tab {
        TabKind::Reset => run_reset(state, runtime, view_data, internal_tx),
        TabKind::DiscSurvey | TabKind::AnchorsSurvey => {
            begin_edit(state, view_data, internal_tx);
        }
        _ => {}
    }
}

fn begin_edit(state: &mut AppState, view_data: &mut ViewData, internal_tx: &Sender<InternalEvent>) {
    let Some(target) = view_data
        .page
        .as_ref()
        .and_then(|page| page.editable.get(view_data.selection))
        .cloned()
    else {
        emit_status(state, view_data, internal_tx, "nothing to answer here");
        return;
    };

    view_data.edit = Some(if target.options.is_empty() {
        EditUiState::Input {
            name: target.name,
            prompt: target.prompt,
            buffer: target.value.map(format_plain).unwrap_or_default(),
        }
    } else {
        let cursor = target
            .options
            .iter()
            .position(|(score, _)| {
                target
                    .value
                    .is_some_and(|value| (score - value).abs() < 1e-9)
            })
            .unwrap_or(0);
        EditUiState::Selector {
            name: target.name,
            prompt: target.prompt,
            options: target.options,
            cursor,
        }
    });
    state.dispatch(AppCommand::EnterEditMode);
}

fn handle_edit_key<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Esc => {
            view_data.edit = None;
            state.dispatch(AppCommand::ExitToNav);
        }
        KeyCode::Enter => commit_edit(state, runtime, view_data, internal_tx),
        _ => {
            let Some(edit) = view_data.edit.as_mut() else {
                state.dispatch(AppCommand::ExitToNav);
                return;
            };
            match edit {
                EditUiState::Input { buffer, .. } => match key.code {
                    KeyCode::Backspace => {
                        buffer.pop();
                    }
                    KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                        buffer.push(ch);
                    }
                    _ => {}
                },
                EditUiState::Selector {
                    options, cursor, ..
                } => {
                    if options.is_empty() {
                        return;
                    }
                    match key.code {
                        KeyCode::Char('j') | KeyCode::Down => {
                            *cursor = (*cursor + 1) % options.len();
                        }
                        KeyCode::Char('k') | KeyCode::Up => {
                            *cursor = (*cursor + options.len() - 1) % options.len();
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

fn commit_edit<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(session) = state.session.clone() else {
        return;
    };
    let Some(form) = state.active_tab.form() else {
        return;
    };
    let Some(edit) = view_data.edit.clone() else {
        return;
    };

    let input = match edit {
        EditUiState::Input { name, buffer, .. } => SurveyValueFormInput {
            form,
            element: name,
            raw_value: buffer,
        },
        EditUiState::Selector {
            name,
            options,
            cursor,
            ..
        } => {
            let Some((score, _)) = options.get(cursor) else {
                emit_status(state, view_data, internal_tx, "selector has no options to pick");
                return;
            };
            SurveyValueFormInput {
                form,
                element: name,
                raw_value: score.to_string(),
            }
        }
    };

    if let Err(error) = input.validate() {
        emit_status(state, view_data, internal_tx, error.to_string());
        return;
    }

    let ctx = RequestContext::new(session.id, form);
    match runtime.submit_value(&ctx, &input) {
        Ok(()) => {
            view_data.edit = None;
            state.dispatch(AppCommand::ExitToNav);
            match refresh_view_data(state, runtime, view_data) {
                Ok(()) => emit_status(
                    state,
                    view_data,
                    internal_tx,
                    format!("saved {}", input.element),
                ),
                Err(error) => {
                    emit_status(state, view_data, internal_tx, format!("load failed: {error}"));
                }
            }
        }
        Err(error) => emit_status(state, view_data, internal_tx, format!("save failed: {error}")),
    }
}

fn run_reset<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(session) = state.session.clone() else {
        return;
    };
    let form = FormTable::ALL[view_data.reset.cursor.min(FormTable::ALL.len() - 1)];
    let ctx = RequestContext::new(session.id, form);
    let confirmed = view_data.reset.armed;

    match runtime.reset_values(&ctx, confirmed) {
        Ok(Some(rows)) => {
            view_data.reset.armed = false;
            log_access(
                state,
                runtime,
                view_data,
                internal_tx,
                session.id,
                &format!("reset {} ({rows} rows)", form.as_str()),
            );
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("reset {}: {rows} rows cleared", form.as_str()),
            );
        }
        Ok(None) => emit_status(
            state,
            view_data,
            internal_tx,
            "reset not confirmed -- press space to arm it and retry",
        ),
        Err(error) => emit_status(state, view_data, internal_tx, format!("reset failed: {error}")),
    }
}

fn export_active_report<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(form) = state.active_tab.form() else {
        return;
    };
    if !form.is_results() {
        emit_status(state, view_data, internal_tx, "export runs from a results tab");
        return;
    }
    let Some(session) = state.session.clone() else {
        return;
    };

    let ctx = RequestContext::new(session.id, form);
    match runtime.export_report(&ctx) {
        Ok(path) => {
            log_access(
                state,
                runtime,
                view_data,
                internal_tx,
                session.id,
                &format!("exported {} report", state.active_tab.label()),
            );
            emit_status(
                state,
                view_data,
                internal_tx,
                format!("report saved to {}", path.display()),
            );
        }
        Err(error) => emit_status(
            state,
            view_data,
            internal_tx,
            format!("report export failed: {error}"),
        ),
    }
}

fn sign_out<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let Some(session) = state.session.clone() else {
        return;
    };
    log_access(state, runtime, view_data, internal_tx, session.id, "signed out");
    state.dispatch(AppCommand::SignOut);
    // Keep the token counter so stale clear timers cannot wipe new statuses.
    *view_data = ViewData {
        status_token: view_data.status_token,
        ..ViewData::default()
    };
}

fn dispatch_and_refresh<R: AppRuntime>(
    state: &mut AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
    command: AppCommand,
    internal_tx: &Sender<InternalEvent>,
) {
    let events = state.dispatch(command);
    let tab_changed = events
        .iter()
        .any(|event| matches!(event, AppEvent::TabChanged(_)));
    if tab_changed {
        view_data.selection = 0;
        view_data.scroll = 0;
        view_data.reset = ResetUiState::default();
    }

    if should_refresh_view(&events)
        && let Err(error) = refresh_view_data(state, runtime, view_data)
    {
        emit_status(state, view_data, internal_tx, format!("load failed: {error}"));
    }

    if tab_changed
        && let Some(session) = state.session.clone()
        && state.active_tab.form().is_some_and(FormTable::is_results)
    {
        log_access(
            state,
            runtime,
            view_data,
            internal_tx,
            session.id,
            &format!("viewed {}", state.active_tab.label()),
        );
    }

    if events
        .iter()
        .any(|event| matches!(event, AppEvent::StatusUpdated(_)))
    {
        view_data.status_token = view_data.status_token.saturating_add(1);
        schedule_status_clear(internal_tx, view_data.status_token);
    }
}

fn should_refresh_view(events: &[AppEvent]) -> bool {
    events.iter().any(|event| {
        matches!(
            event,
            AppEvent::TabChanged(_) | AppEvent::SessionStarted(_)
        )
    })
}

fn refresh_view_data<R: AppRuntime>(
    state: &AppState,
    runtime: &mut R,
    view_data: &mut ViewData,
) -> Result<()> {
    let Some(session) = &state.session else {
        view_data.page = None;
        view_data.analysis = None;
        return Ok(());
    };

    view_data.counts = runtime.load_progress(session.id)?;

    match state.active_tab.form() {
        Some(form) => {
            let ctx = RequestContext::new(session.id, form);
            let elements = runtime.load_elements(&ctx)?;
            let page = build_page(form.title(), &elements);
            view_data.selection = view_data
                .selection
                .min(page.editable.len().saturating_sub(1));
            view_data.analysis = if form == FormTable::DiscResults {
                Some(load_analysis_text(runtime, &ctx))
            } else {
                None
            };
            view_data.page = Some(page);
        }
        None => {
            view_data.page = None;
            view_data.analysis = None;
        }
    }

    if state.active_tab == TabKind::Monitor {
        view_data.access_log = runtime.load_access_log(ACCESS_LOG_LIMIT)?;
    }
    Ok(())
}

fn load_analysis_text<R: AppRuntime>(runtime: &mut R, ctx: &RequestContext) -> String {
    match runtime.load_analysis(ctx) {
        Ok(text) => text,
        Err(error) => format!("Profile analysis is not available: {error}"),
    }
}

fn render(frame: &mut ratatui::Frame<'_>, state: &AppState, view_data: &ViewData) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    if state.mode == AppMode::Login {
        let banner = Paragraph::new("QUADRA behavioral assessment")
            .block(Block::default().title("quadra").borders(Borders::ALL));
        frame.render_widget(banner, layout[0]);

        let area = centered_rect(56, 42, frame.area());
        frame.render_widget(Clear, area);
        let login = Paragraph::new(render_login_text(&view_data.login))
            .block(Block::default().title("sign in").borders(Borders::ALL));
        frame.render_widget(login, area);

        render_status_bar(frame, layout[2], state, view_data);
        return;
    }

    let visible = state.visible_tabs();
    let selected = visible
        .iter()
        .position(|tab| *tab == state.active_tab)
        .unwrap_or(0);
    let tab_titles = visible
        .iter()
        .map(|tab| tab.label().to_owned())
        .collect::<Vec<String>>();
    let tabs = Tabs::new(tab_titles)
        .block(Block::default().title("quadra").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(selected);
    frame.render_widget(tabs, layout[0]);

    let body = Paragraph::new(render_body_text(state, view_data))
        .scroll((view_data.scroll, 0))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(state.active_tab.label()),
        );
    frame.render_widget(body, layout[1]);

    render_status_bar(frame, layout[2], state, view_data);

    if let Some(edit) = &view_data.edit {
        let area = centered_rect(54, 42, frame.area());
        frame.render_widget(Clear, area);
        let editor = Paragraph::new(render_edit_text(edit)).block(
            Block::default()
                .title("answer")
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(editor, area);
    }

    if view_data.help_visible {
        let area = centered_rect(72, 64, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn render_status_bar(
    frame: &mut ratatui::Frame<'_>,
    area: Rect,
    state: &AppState,
    view_data: &ViewData,
) {
    let status = Paragraph::new(status_text(state, view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, area);
}

fn render_body_text(state: &AppState, view_data: &ViewData) -> String {
    match state.active_tab {
        TabKind::Welcome => render_welcome_text(state, view_data),
        TabKind::Monitor => render_access_log_text(&view_data.access_log),
        TabKind::Reset => render_reset_text(view_data),
        _ => {
            let Some(page) = &view_data.page else {
                return "Loading...".to_owned();
            };
            let selection = state
                .active_tab
                .form()
                .filter(|form| !form.is_results())
                .map(|_| view_data.selection);
            let mut text = render_page_text(page, selection);
            if let Some(analysis) = &view_data.analysis {
                text.push_str("\n\n");
                text.push_str(&center_line("Profile Analysis"));
                text.push('\n');
                text.push_str(analysis);
            }
            text
        }
    }
}

fn render_welcome_text(state: &AppState, view_data: &ViewData) -> String {
    let Some(session) = &state.session else {
        return String::new();
    };
    [
        format!("Welcome, {} ({})", session.name, session.role.label()),
        format!("Company: {}", session.company),
        String::new(),
        format!(
            "DISC survey: {} of {} questions answered",
            view_data.counts.disc.answered, view_data.counts.disc.total
        ),
        format!(
            "Anchors survey: {} of {} questions answered",
            view_data.counts.anchors.answered, view_data.counts.anchors.total
        ),
        String::new(),
        "Use f/b to move between tabs, enter to answer, e to export a report.".to_owned(),
    ]
    .join("\n")
}

fn render_access_log_text(entries: &[AccessLogEntry]) -> String {
    if entries.is_empty() {
        return "No access log entries yet.".to_owned();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  user {}  {}  {}",
                format_timestamp(entry.created_at),
                entry.user_id.get(),
                entry.program,
                entry.action
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

fn render_reset_text(view_data: &ViewData) -> String {
    let mut lines = vec![
        "Clear recorded answers and computed scores for one form.".to_owned(),
        "Labels, spacers, and layout rows are left untouched.".to_owned(),
        String::new(),
    ];
    for (index, form) in FormTable::ALL.iter().enumerate() {
        let marker = if index == view_data.reset.cursor {
            CURSOR_MARK
        } else {
            "  "
        };
        lines.push(format!("{marker}{}", form.title()));
    }
    lines.push(String::new());
    lines.push(if view_data.reset.armed {
        "ARMED: enter clears values for the selected form.".to_owned()
    } else {
        "Press space to arm the reset, then enter to run it.".to_owned()
    });
    lines.join("\n")
}

fn render_login_text(login: &LoginUiState) -> String {
    let email_marker = if login.field == LoginField::Email {
        CURSOR_MARK
    } else {
        "  "
    };
    let password_marker = if login.field == LoginField::Password {
        CURSOR_MARK
    } else {
        "  "
    };
    let masked = "*".repeat(login.password.chars().count());

    let mut lines = vec![
        "Sign in to continue.".to_owned(),
        String::new(),
        format!("{email_marker}email:    {}", login.email),
        format!("{password_marker}password: {masked}"),
        String::new(),
    ];
    if let Some(error) = &login.error {
        lines.push(format!("{ERROR_MARK} {error}"));
        lines.push(String::new());
    }
    lines.push("tab switches fields | enter signs in | esc quits".to_owned());
    lines.join("\n")
}

fn render_edit_text(edit: &EditUiState) -> String {
    match edit {
        EditUiState::Input { prompt, buffer, .. } => {
            format!("{prompt}\n\nvalue: {buffer}█\n\nenter saves | esc cancels")
        }
        EditUiState::Selector {
            prompt,
            options,
            cursor,
            ..
        } => {
            let mut lines = vec![prompt.clone(), String::new()];
            for (index, (score, label)) in options.iter().enumerate() {
                let marker = if index == *cursor { CURSOR_MARK } else { "  " };
                lines.push(format!("{marker}{label} ({})", format_score(Some(*score))));
            }
            lines.push(String::new());
            lines.push("j/k move | enter saves | esc cancels".to_owned());
            lines.join("\n")
        }
    }
}

fn render_page_text(page: &PageView, selection: Option<usize>) -> String {
    let mut lines = vec![center_line(&page.title), String::new()];
    for block in &page.blocks {
        match block {
            PageBlock::Table(result) | PageBlock::Chart(result) => {
                lines.extend(render_widget_lines(result, selection));
            }
            PageBlock::PageBreak => lines.push("─".repeat(PAGE_WIDTH)),
            PageBlock::Columns { left, right } => {
                let left_lines = left
                    .iter()
                    .flat_map(|result| render_widget_lines(result, selection))
                    .collect::<Vec<String>>();
                let right_lines = right
                    .iter()
                    .flat_map(|result| render_widget_lines(result, selection))
                    .collect::<Vec<String>>();
                lines.extend(merge_column_lines(&left_lines, &right_lines));
            }
        }
    }
    lines.join("\n")
}

fn render_widget_lines(result: &WidgetResult, selection: Option<usize>) -> Vec<String> {
    match result {
        WidgetResult::Failed { name, detail } => {
            vec![format!("{ERROR_MARK} {name}: {detail}")]
        }
        WidgetResult::Rendered(widget) => match widget {
            Widget::Label(text) => vec![text.clone()],
            Widget::Spacer => vec![String::new()],
            Widget::Chart(chart) => render_chart_lines(chart),
            Widget::SummaryTable(table) => render_table_lines(table),
            Widget::Input(input) => vec![render_input_line(input, selection)],
            Widget::Selector(selector) => vec![render_selector_line(selector, selection)],
        },
    }
}

fn render_chart_lines(chart: &ChartWidget) -> Vec<String> {
    let mut lines = vec![center_line(&chart.title)];
    let max_value = chart
        .bars
        .iter()
        .fold(1.0_f64, |acc, bar| acc.max(bar.value));
    for bar in &chart.bars {
        let filled = ((bar.value.max(0.0) / max_value) * BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(BAR_WIDTH);
        lines.push(format!(
            "{:>label_width$} {}{} {}",
            truncate_label(&bar.label, BAR_LABEL_WIDTH),
            "█".repeat(filled),
            " ".repeat(BAR_WIDTH - filled),
            format_score(Some(bar.value)),
            label_width = BAR_LABEL_WIDTH,
        ));
    }
    lines.push(String::new());
    lines
}

fn render_table_lines(table: &TableWidget) -> Vec<String> {
    let mut lines = vec![center_line(&table.title)];
    let label_width = table
        .rows
        .iter()
        .map(|row| row.label.chars().count())
        .max()
        .unwrap_or(0);
    for row in &table.rows {
        let body = format!(
            "{:<label_width$}  {:>8}",
            row.label,
            row.value,
            label_width = label_width,
        );
        lines.push(center_line(&body));
    }
    lines.push(String::new());
    lines
}

fn render_input_line(input: &InputWidget, selection: Option<usize>) -> String {
    let marker = if selection == Some(input.ordinal) {
        CURSOR_MARK
    } else {
        "  "
    };
    let value = input
        .value
        .map(|value| format_score(Some(value)))
        .unwrap_or_else(|| "-".to_owned());
    format!("{marker}{} [{value}]", input.prompt)
}

fn render_selector_line(selector: &SelectorWidget, selection: Option<usize>) -> String {
    let marker = if selection == Some(selector.ordinal) {
        CURSOR_MARK
    } else {
        "  "
    };
    let chosen = selector
        .value
        .and_then(|value| {
            selector
                .options
                .iter()
                .find(|(score, _)| (score - value).abs() < 1e-9)
                .map(|(_, label)| label.clone())
        })
        .unwrap_or_else(|| "-".to_owned());
    format!("{marker}{} [{chosen}]", selector.prompt)
}

fn merge_column_lines(left: &[String], right: &[String]) -> Vec<String> {
    let rows = left.len().max(right.len());
    (0..rows)
        .map(|index| {
            let left_text = left.get(index).map(String::as_str).unwrap_or("");
            let right_text = right.get(index).map(String::as_str).unwrap_or("");
            if right_text.is_empty() {
                left_text.to_owned()
            } else {
                format!(
                    "{:<width$}  {right_text}",
                    truncate_label(left_text, COLUMN_WIDTH),
                    width = COLUMN_WIDTH,
                )
            }
        })
        .collect()
}

fn status_text(state: &AppState, view_data: &ViewData) -> String {
    if view_data.help_visible {
        return String::new();
    }
    let mode = match state.mode {
        AppMode::Login => "LOGIN",
        AppMode::Nav => "NAV",
        AppMode::Edit => "EDIT",
    };
    let hints = match state.mode {
        AppMode::Login => "enter sign in | ctrl+q quit",
        AppMode::Edit => "enter save | esc cancel",
        AppMode::Nav => nav_hints(state.active_tab),
    };
    match &state.status_line {
        Some(status) => format!("{mode} | {status} | {hints}"),
        None => format!("{mode} | {hints}"),
    }
}

fn nav_hints(tab: TabKind) -> &'static str {
    match tab {
        TabKind::Welcome => "f/b tabs | ? help | esc sign out | ctrl+q quit",
        TabKind::DiscSurvey | TabKind::AnchorsSurvey => {
            "f/b tabs | j/k select | enter answer | ? help | esc sign out"
        }
        TabKind::DiscResults | TabKind::AnchorsResults => {
            "f/b tabs | e export pdf | ctrl+d/u scroll | ? help | esc sign out"
        }
        TabKind::Monitor => "f/b tabs | j/k scroll | ? help | esc sign out",
        TabKind::Reset => "f/b tabs | j/k select | space arm | enter reset | esc sign out",
    }
}

fn help_overlay_text() -> &'static str {
    "f/b or arrows     switch tabs\n\
     j/k               move the selection or scroll\n\
     enter             answer the selected question / run the reset\n\
     space             arm or disarm the reset\n\
     e                 export the results report (results tabs)\n\
     r                 reload the current page\n\
     ctrl+d / ctrl+u   scroll half a page\n\
     esc               sign out\n\
     ctrl+q            quit\n\
     ?                 toggle this help"
}

fn format_timestamp(moment: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        moment.year(),
        u8::from(moment.month()),
        moment.day(),
        moment.hour(),
        moment.minute()
    )
}

fn format_plain(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn center_line(text: &str) -> String {
    let width = text.chars().count();
    if width >= PAGE_WIDTH {
        return text.to_owned();
    }
    let pad = (PAGE_WIDTH - width) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

fn truncate_label(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_owned();
    }
    let truncated = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    format!("{truncated}…")
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
