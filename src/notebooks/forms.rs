use std::path::Path;

use axum::extract::Multipart;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::forms::{blank_as_none, FieldErrors};
use crate::notebooks::repo_types::ScriptType;

pub const MAX_PARAMETERS_LEN: usize = 1024;
pub const MAX_NAME_LEN: usize = 128;
pub const NAME_TAKEN: &str = "A notebook with this name already exists.";
pub const PATH_TAKEN: &str = "A notebook with this file name already exists.";
pub const PARAMETERS_TOO_LONG: &str = "Parameters must be at most 1024 characters.";

/// Raw fields of the multipart upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub file_name: Option<String>,
    pub content: Bytes,
    pub script_type: String,
    pub parameters: String,
    pub name: String,
}

/// An upload that passed validation.
#[derive(Debug)]
pub struct ValidUpload {
    pub file_name: String,
    pub content: Bytes,
    pub name: String,
    pub script_type: ScriptType,
    pub parameters: Option<Map<String, Value>>,
}

impl UploadForm {
    pub async fn from_multipart(mut mp: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "notebook" => {
                    form.file_name = field.file_name().map(str::to_string);
                    form.content = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                }
                "script_type" | "parameters" | "name" => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    match name.as_str() {
                        "script_type" => form.script_type = text,
                        "parameters" => form.parameters = text,
                        _ => form.name = text,
                    }
                }
                _ => {}
            }
        }
        Ok(form)
    }

    pub fn echo(&self) -> Value {
        json!({
            "file_name": self.file_name,
            "script_type": self.script_type,
            "parameters": self.parameters,
            "name": self.name,
        })
    }

    pub fn validate(&self) -> Result<ValidUpload, FieldErrors> {
        let mut errors = FieldErrors::default();

        let file_name = self
            .file_name
            .as_deref()
            .map(sanitize_filename)
            .filter(|f| !f.is_empty());
        match &file_name {
            None => errors.add("notebook", "This field is required."),
            Some(f) if !f.to_lowercase().ends_with(".ipynb") => {
                errors.add("notebook", "Only Jupyter notebooks (.ipynb) are allowed.")
            }
            Some(_) if self.content.is_empty() => errors.add("notebook", "The file is empty."),
            Some(_) => {}
        }

        let script_type = ScriptType::parse(&self.script_type);
        if script_type.is_none() {
            errors.add("script_type", "Not a valid choice.");
        }

        let parameters = match parse_parameters(&self.parameters) {
            Ok(p) => p,
            Err(message) => {
                errors.add("parameters", message);
                None
            }
        };

        let name = match self.name.trim() {
            "" => file_name
                .as_deref()
                .and_then(|f| Path::new(f).file_stem())
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
            given => given.to_string(),
        };
        if name.chars().count() > MAX_NAME_LEN {
            errors.add("name", format!("Name must be at most {MAX_NAME_LEN} characters."));
        }

        match (file_name, script_type) {
            (Some(file_name), Some(script_type)) if errors.is_empty() => Ok(ValidUpload {
                file_name,
                content: self.content.clone(),
                name,
                script_type,
                parameters,
            }),
            _ => Err(errors),
        }
    }
}

/// Optional parameters text: blank means none, otherwise a JSON object.
pub fn parse_parameters(raw: &str) -> Result<Option<Map<String, Value>>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw.chars().count() > MAX_PARAMETERS_LEN {
        return Err(PARAMETERS_TOO_LONG.into());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(_) => Err("Parameters must be a JSON object.".into()),
        Err(e) => Err(format!("Invalid JSON: {e}")),
    }
}

/// Keep only the final path component and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

#[derive(Debug, Deserialize)]
pub struct ParameterEditForm {
    #[serde(default)]
    pub action: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub value: Option<String>,
}

/// A validated in-place edit of a notebook's parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterEdit {
    Set { key: String, value: Value },
    Delete { key: String },
    Replace(Map<String, Value>),
}

impl ParameterEditForm {
    pub fn echo(&self) -> Value {
        json!({ "action": self.action, "key": self.key, "value": self.value })
    }

    pub fn parse(&self) -> Result<ParameterEdit, FieldErrors> {
        let key = || {
            self.key
                .as_ref()
                .map(|k| k.trim().to_string())
                .ok_or_else(|| FieldErrors::single("key", "This field is required."))
        };
        let value = || {
            self.value
                .as_deref()
                .ok_or_else(|| FieldErrors::single("value", "This field is required."))
        };

        match self.action.trim() {
            "set" => {
                let key = key()?;
                let raw = value()?;
                let value = serde_json::from_str(raw)
                    .map_err(|e| FieldErrors::single("value", format!("Invalid JSON: {e}")))?;
                Ok(ParameterEdit::Set { key, value })
            }
            "delete" => Ok(ParameterEdit::Delete { key: key()? }),
            "replace" => match parse_parameters(value()?) {
                Ok(map) => Ok(ParameterEdit::Replace(map.unwrap_or_default())),
                Err(message) => Err(FieldErrors::single("value", message)),
            },
            _ => Err(FieldErrors::single(
                "action",
                "Action must be one of set, delete, replace.",
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunForm {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub output_path: Option<String>,
}

impl RunForm {
    pub fn echo(&self) -> Value {
        json!({ "output_path": self.output_path })
    }

    /// The requested output as a plain `.ipynb` file name. It is always
    /// placed under the configured output directory.
    pub fn output_file(&self) -> Result<Option<String>, FieldErrors> {
        let Some(raw) = self.output_path.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.contains(['/', '\\']) || raw.contains("..") || raw.starts_with('.') {
            return Err(FieldErrors::single(
                "output_path",
                "Output path must be a plain file name.",
            ));
        }
        if !raw.to_lowercase().ends_with(".ipynb") {
            return Err(FieldErrors::single(
                "output_path",
                "Output file must end with .ipynb.",
            ));
        }
        Ok(Some(sanitize_filename(raw)))
    }
}
