// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::{AppMode, SessionUser, TabKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub mode: AppMode,
    pub session: Option<SessionUser>,
    pub active_tab: TabKind,
    pub status_line: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            mode: AppMode::Login,
            session: None,
            active_tab: TabKind::Welcome,
            status_line: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    NextTab,
    PrevTab,
    EnterEditMode,
    ExitToNav,
    SignIn(SessionUser),
    SignOut,
    SetStatus(String),
    ClearStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    ModeChanged(AppMode),
    TabChanged(TabKind),
    SessionStarted(SessionUser),
    SessionEnded,
    StatusUpdated(String),
    StatusCleared,
}

impl AppState {
    pub fn dispatch(&mut self, command: AppCommand) -> Vec<AppEvent> {
        match command {
            AppCommand::NextTab => self.rotate_tab(1),
            AppCommand::PrevTab => self.rotate_tab(-1),
            AppCommand::EnterEditMode => {
                self.mode = AppMode::Edit;
                vec![AppEvent::ModeChanged(self.mode)]
            }
            AppCommand::ExitToNav => {
                self.mode = AppMode::Nav;
                vec![AppEvent::ModeChanged(self.mode)]
            }
            AppCommand::SignIn(user) => {
                let status = self.set_status(&format!("signed in as {}", user.name));
                self.session = Some(user.clone());
                self.mode = AppMode::Nav;
                self.active_tab = TabKind::Welcome;
                vec![
                    AppEvent::SessionStarted(user),
                    AppEvent::ModeChanged(self.mode),
                    AppEvent::TabChanged(self.active_tab),
                    status,
                ]
            }
            AppCommand::SignOut => {
                self.session = None;
                self.mode = AppMode::Login;
                self.active_tab = TabKind::Welcome;
                vec![
                    AppEvent::SessionEnded,
                    AppEvent::ModeChanged(self.mode),
                    self.set_status("signed out"),
                ]
            }
            AppCommand::SetStatus(message) => vec![self.set_status(&message)],
            AppCommand::ClearStatus => {
                self.status_line = None;
                vec![AppEvent::StatusCleared]
            }
        }
    }

    pub fn visible_tabs(&self) -> Vec<TabKind> {
        match &self.session {
            Some(session) => TabKind::visible_for(session.role),
            None => Vec::new(),
        }
    }

    fn rotate_tab(&mut self, delta: isize) -> Vec<AppEvent> {
        let tabs = self.visible_tabs();
        if tabs.is_empty() {
            return Vec::new();
        }
        let current = tabs
            .iter()
            .position(|tab| *tab == self.active_tab)
            .unwrap_or(0) as isize;
        let len = tabs.len() as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        self.active_tab = tabs[next];
        vec![AppEvent::TabChanged(self.active_tab)]
    }

    fn set_status(&mut self, message: &str) -> AppEvent {
        self.status_line = Some(message.to_owned());
        AppEvent::StatusUpdated(message.to_owned())
    }
}
