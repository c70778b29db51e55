// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, bail};

use crate::FormTable;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginFormInput {
    pub email: String,
    pub password: String,
}

impl LoginFormInput {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() {
            bail!("email is required -- enter the account email and retry");
        }
        if !email.contains('@') {
            bail!("email looks invalid -- enter an address like you@company.com and retry");
        }
        if self.password.is_empty() {
            bail!("password is required -- enter the account password and retry");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyValueFormInput {
    pub form: FormTable,
    pub element: String,
    pub raw_value: String,
}

impl SurveyValueFormInput {
    pub fn blank(form: FormTable, element: &str) -> Self {
        Self {
            form,
            element: element.to_owned(),
            raw_value: String::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.parsed_value().map(|_| ())
    }

    pub fn parsed_value(&self) -> Result<f64> {
        if self.element.trim().is_empty() {
            bail!("no survey row is selected -- pick a row and retry");
        }
        let raw = self.raw_value.trim();
        if raw.is_empty() {
            bail!("value is required -- enter a number like 3 or 2.5 and retry");
        }
        let Ok(value) = raw.parse::<f64>() else {
            bail!("value {raw:?} is not numeric -- enter a number like 3 or 2.5 and retry");
        };
        if !value.is_finite() {
            bail!("value must be finite -- enter a number like 3 or 2.5 and retry");
        }
        Ok(value)
    }
}
