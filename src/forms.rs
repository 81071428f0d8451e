//! Per-field form errors and the JSON "form page" handlers answer with.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationErrors};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = Self::default();
        for (field, errs) in errors.field_errors() {
            for e in errs {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({}).", e.code));
                out.add(&field.to_string(), message);
            }
        }
        out
    }
}

/// Run the derived validators of `form`, collecting errors per field.
pub fn validate<F: Validate>(form: &F) -> FieldErrors {
    form.validate().map(|_| FieldErrors::default()).unwrap_or_else(Into::into)
}

/// A form rendered as JSON: the echoed (non-secret) data and its errors.
#[derive(Debug, Serialize)]
pub struct FormPage {
    pub form: &'static str,
    pub data: serde_json::Value,
    pub errors: FieldErrors,
}

impl FormPage {
    pub fn new(form: &'static str, data: serde_json::Value) -> Self {
        Self {
            form,
            data,
            errors: FieldErrors::default(),
        }
    }

    pub fn invalid(form: &'static str, data: serde_json::Value, errors: FieldErrors) -> Self {
        Self { form, data, errors }
    }
}

impl IntoResponse for FormPage {
    fn into_response(self) -> Response {
        let status = if self.errors.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        (status, Json(self)).into_response()
    }
}

/// HTML-style checkbox: present with any value other than `false`/`0`/`off`.
pub fn checkbox<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.is_some_and(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "off")))
}

/// Empty form fields become `None`.
pub fn blank_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.trim().is_empty()))
}
