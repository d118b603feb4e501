use std::path::PathBuf;

use console::style;
use tokio::sync::mpsc;

use crate::api::{ApiError, BackendClient, QueryOutcome, UploadOutcome};
use crate::widget::{CorrelationId, Mode, QueryTask, Sender, Severity, UploadTask, Widget};

/// Result of a backend call, posted back to the task that owns the [`Widget`].
#[derive(Debug)]
pub enum Completion {
    Upload(Result<UploadOutcome, ApiError>),
    Query {
        id: CorrelationId,
        result: Result<QueryOutcome, ApiError>,
    },
}

impl Completion {
    pub fn apply(self, widget: &mut Widget) {
        match self {
            Completion::Upload(result) => widget.finish_upload(result),
            Completion::Query { id, result } => widget.finish_query(id, result),
        }
    }
}

pub fn spawn_upload(client: &BackendClient, task: UploadTask, tx: &mpsc::Sender<Completion>) {
    let client = client.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = client.upload(&task.path).await;
        if tx.send(Completion::Upload(result)).await.is_err() {
            tracing::debug!("UI gone before upload of {} finished", task.path.display());
        }
    });
}

pub fn spawn_query(client: &BackendClient, task: QueryTask, tx: &mpsc::Sender<Completion>) {
    let client = client.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = client.query(&task.request).await;
        if tx.send(Completion::Query { id: task.id, result }).await.is_err() {
            tracing::debug!("UI gone before query {} finished", task.id);
        }
    });
}

/// Headless upload-then-ask. Drives the same controller as the TUI and
/// prints its transcript.
pub async fn run_ask(
    client: BackendClient,
    mut widget: Widget,
    path: PathBuf,
    query: String,
) -> anyhow::Result<()> {
    widget.select_file(Some(path));
    println!("{} {}", style("File:").bold(), widget.file_label());

    if let Some(task) = widget.submit_upload() {
        print_status(&widget);
        let result = client.upload(&task.path).await;
        widget.finish_upload(result);
    }
    print_status(&widget);

    if widget.mode() != Mode::FileReady {
        let reason = widget.status().map(|s| s.text.clone()).unwrap_or_default();
        anyhow::bail!("Upload failed: {}", reason);
    }

    *widget.query_input_mut() = query;
    let Some(task) = widget.send_query() else {
        anyhow::bail!("Query is empty");
    };
    let result = client.query(&task.request).await;
    let failed = !matches!(result, Ok(QueryOutcome::Answer(_)));
    widget.finish_query(task.id, result);

    for msg in widget.transcript().messages() {
        match msg.sender {
            Sender::User => println!("{} {}", style("▶ You").blue().bold(), msg.text),
            Sender::Bot => println!("{} {}", style("◆ Assistant").cyan().bold(), msg.text),
        }
    }

    if failed {
        anyhow::bail!("Query failed");
    }
    Ok(())
}

fn print_status(widget: &Widget) {
    if let Some(status) = widget.status() {
        let text = match status.severity {
            Severity::Loading => style(&status.text).yellow(),
            Severity::Success => style(&status.text).green(),
            Severity::Error => style(&status.text).red(),
        };
        println!("{}", text);
    }
}
