use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{unique_violation, AppError, AppResult};
use crate::mutable::CodecError;
use crate::notebooks::executor::NotebookExecutor;
use crate::notebooks::forms::{sanitize_filename, ParameterEdit, ValidUpload, MAX_PARAMETERS_LEN};
use crate::notebooks::repo_types::{NewNotebook, Notebook};
use crate::runs::repo::UQ_OUTPUT_PATH;
use crate::runs::PapermillRun;
use crate::state::AppState;

/// Where an upload named `file_name` is stored.
pub fn upload_path(upload_dir: &Path, file_name: &str) -> PathBuf {
    upload_dir.join(sanitize_filename(file_name))
}

/// `<output_dir>/<notebook name>-<run id>.ipynb`
pub fn default_output_path(output_dir: &Path, notebook_name: &str, run_id: Uuid) -> PathBuf {
    let stem = sanitize_filename(notebook_name);
    let stem = if stem.is_empty() { "notebook" } else { stem.as_str() };
    output_dir.join(format!("{stem}-{run_id}.ipynb"))
}

/// Insert the notebook row and store the uploaded file. The file is
/// staged under a temporary name and renamed into place before the commit;
/// a failed commit removes it again. An existing file is never replaced.
pub async fn store_upload(
    state: &AppState,
    author: Uuid,
    upload: &ValidUpload,
) -> AppResult<Notebook> {
    let dir = &state.config.notebooks.upload_dir;
    let path = upload_path(dir, &upload.file_name);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::Conflict(format!("{} already exists", path.display())));
    }
    let path_text = path.to_string_lossy();
    let parameters = upload.parameters.clone().map(Value::Object);

    let mut tx = state.db.begin().await?;
    let notebook = Notebook::create(
        &mut *tx,
        &NewNotebook {
            name: &upload.name,
            script_type: upload.script_type,
            path: &path_text,
            parameters: parameters.as_ref(),
            author,
        },
    )
    .await?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create upload dir {}", dir.display()))?;
    let staged = dir.join(format!(".upload-{}.part", Uuid::new_v4()));
    let written: anyhow::Result<()> = async {
        tokio::fs::write(&staged, &upload.content)
            .await
            .with_context(|| format!("write notebook {}", staged.display()))?;
        tokio::fs::rename(&staged, &path)
            .await
            .with_context(|| format!("move notebook into {}", path.display()))
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(e.into());
    }

    if let Err(e) = tx.commit().await {
        if let Err(rm) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %rm, "failed to remove uploaded file");
        }
        return Err(e.into());
    }

    info!(notebook_id = %notebook.id, name = %notebook.name, path = %notebook.path, "notebook uploaded");
    Ok(notebook)
}

/// Apply `edit` to the tracked parameters in place. Returns whether the row
/// became dirty.
pub fn apply_parameter_edit(notebook: &mut Notebook, edit: ParameterEdit) -> bool {
    match edit {
        ParameterEdit::Set { key, value } => match notebook.parameters.dict_mut() {
            Some(dict) => {
                dict.insert(key, value);
            }
            None => {
                let mut fresh = Map::new();
                fresh.insert(key, value);
                notebook.parameters.replace(Some(Value::Object(fresh)));
            }
        },
        ParameterEdit::Delete { key } => {
            if let Some(dict) = notebook.parameters.dict_mut() {
                dict.remove(&key);
            }
        }
        ParameterEdit::Replace(map) => {
            notebook.parameters.replace(Some(Value::Object(map)));
        }
    }
    notebook.is_dirty()
}

/// Whether the encoded parameters exceed [`MAX_PARAMETERS_LEN`].
pub fn parameters_too_long(notebook: &Notebook) -> Result<bool, CodecError> {
    Ok(notebook
        .parameters
        .encode()?
        .is_some_and(|text| text.chars().count() > MAX_PARAMETERS_LEN))
}

/// Everything one execution needs, detached from the request.
#[derive(Debug, Clone)]
pub struct RunJob {
    pub notebook_id: Uuid,
    pub input: PathBuf,
    pub output: PathBuf,
    pub parameters: Value,
}

impl RunJob {
    pub fn new(notebook: &Notebook, output: PathBuf) -> Self {
        Self {
            notebook_id: notebook.id,
            input: PathBuf::from(&notebook.path),
            output,
            parameters: notebook.execution_parameters(),
        }
    }
}

/// Run `job`. Engine failures are logged and reported as `false`.
pub async fn execute_notebook(executor: &dyn NotebookExecutor, job: &RunJob) -> bool {
    match executor.execute(&job.input, &job.output, &job.parameters).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                notebook_id = %job.notebook_id,
                path = %job.input.display(),
                output = %job.output.display(),
                error = %format!("{e:#}"),
                "notebook execution failed"
            );
            false
        }
    }
}

/// Record a pending run, execute the notebook and store the outcome.
///
/// `output_file` is a plain file name placed under the output directory.
/// Execution and the outcome write run on a spawned task, so the run is
/// completed even when the request is dropped.
pub async fn trigger_run(
    state: &AppState,
    notebook: &Notebook,
    triggered_by: Uuid,
    output_file: Option<&str>,
) -> AppResult<PapermillRun> {
    let run_id = Uuid::new_v4();
    let output_dir = &state.config.notebooks.output_dir;
    let output = match output_file.map(sanitize_filename).filter(|f| !f.is_empty()) {
        Some(file) => output_dir.join(file),
        None => default_output_path(output_dir, &notebook.name, run_id),
    };
    let output_text = output.to_string_lossy().into_owned();

    let pending =
        PapermillRun::create_pending(&state.db, run_id, notebook.id, triggered_by, &output_text)
            .await;
    if let Err(e) = &pending {
        if unique_violation(e) == Some(UQ_OUTPUT_PATH) {
            warn!(notebook_id = %notebook.id, output = %output_text, "output path already used");
            return Err(AppError::Conflict(format!(
                "output path {output_text} is already used by another run"
            )));
        }
    }
    let pending = pending?;
    info!(run_id = %pending.id, notebook_id = %notebook.id, user_id = %triggered_by, "run started");

    let job = RunJob::new(notebook, output);
    let executor = Arc::clone(&state.executor);
    let db = state.db.clone();
    let task = tokio::spawn(async move {
        let success = execute_notebook(executor.as_ref(), &job).await;
        let run = PapermillRun::record_outcome(&db, run_id, success).await;
        if let Err(e) = &run {
            error!(%run_id, error = %e, "failed to record run outcome");
        }
        run
    });
    let run = task.await.context("run task")??;

    info!(run_id = %run.id, success = ?run.ran_successfully, "run finished");
    Ok(run)
}
