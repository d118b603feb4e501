//! Upload/chat controller.
//!
//! Owns everything the user sees: the chosen file, the upload status, the
//! chat transcript and the query input. Handlers run to completion on the UI
//! task. Anything that needs the backend is handed back to the caller as a
//! task ([`UploadTask`], [`QueryTask`]) and its result comes back through
//! [`Widget::finish_upload`] / [`Widget::finish_query`].

use std::fmt;
use std::path::PathBuf;

use crate::api::{ApiError, QueryOutcome, QueryRequest, UploadOutcome};

pub const NO_FILE_LABEL: &str = "No file chosen";
pub const THINKING_TEXT: &str = "Thinking...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// Tags a placeholder so its completion can find it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loading-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub text: String,
    pub sender: Sender,
    pub correlation: Option<CorrelationId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Loading,
    Success,
    Error,
}

impl Severity {
    pub fn class(&self) -> &'static str {
        match self {
            Severity::Loading => "loading",
            Severity::Success => "success",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub text: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    NoFileReady,
    FileReady,
}

/// Session-lifetime state. Written only by a successful upload, read only
/// when a query is composed.
#[derive(Debug, Default)]
pub struct Session {
    active_file: Option<String>,
}

impl Session {
    pub fn active_file(&self) -> Option<&str> {
        self.active_file.as_deref()
    }

    fn set_active_file(&mut self, filename: String) {
        self.active_file = Some(filename);
    }
}

/// Append-only message list, newest last.
#[derive(Debug)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    follow_bottom: bool,
}

impl Default for Transcript {
    fn default() -> Self {
        Self { messages: Vec::new(), follow_bottom: true }
    }
}

impl Transcript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn follow_bottom(&self) -> bool {
        self.follow_bottom
    }

    /// Stop pinning the view to the newest message until the next append.
    pub fn release_bottom(&mut self) {
        self.follow_bottom = false;
    }

    pub fn pin_bottom(&mut self) {
        self.follow_bottom = true;
    }

    pub fn has_placeholders(&self) -> bool {
        self.messages.iter().any(|m| m.correlation.is_some())
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.follow_bottom = true;
    }

    /// Removing an id that is already gone is a no-op.
    fn remove(&mut self, id: CorrelationId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.correlation != Some(id));
        before != self.messages.len()
    }

    fn clear_finalized(&mut self) {
        self.messages.retain(|m| m.correlation.is_some());
        self.follow_bottom = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadTask {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryTask {
    pub id: CorrelationId,
    pub request: QueryRequest,
}

pub struct Widget {
    session: Session,
    transcript: Transcript,
    status: Option<Status>,
    selected_file: Option<PathBuf>,
    file_label: String,
    query_input: String,
    query_enabled: bool,
    models: Vec<String>,
    selected_model: usize,
    next_correlation: u64,
}

impl Widget {
    /// `models` must not be empty; `initial_model` falls back to the first one.
    pub fn new(models: Vec<String>, initial_model: &str) -> Self {
        let selected_model = models.iter().position(|m| m == initial_model).unwrap_or(0);
        Self {
            session: Session::default(),
            transcript: Transcript::default(),
            status: None,
            selected_file: None,
            file_label: NO_FILE_LABEL.to_string(),
            query_input: String::new(),
            query_enabled: false,
            models,
            selected_model,
            next_correlation: 0,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn file_label(&self) -> &str {
        &self.file_label
    }

    pub fn query_input(&self) -> &str {
        &self.query_input
    }

    pub fn query_input_mut(&mut self) -> &mut String {
        &mut self.query_input
    }

    pub fn query_enabled(&self) -> bool {
        self.query_enabled
    }

    pub fn mode(&self) -> Mode {
        if self.query_enabled { Mode::FileReady } else { Mode::NoFileReady }
    }

    pub fn selected_model(&self) -> &str {
        self.models.get(self.selected_model).map(String::as_str).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    pub fn select_file(&mut self, file: Option<PathBuf>) {
        self.file_label = match &file {
            Some(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            None => NO_FILE_LABEL.to_string(),
        };
        self.selected_file = file;
    }

    /// Returns the upload to run, or `None` when nothing was selected.
    pub fn submit_upload(&mut self) -> Option<UploadTask> {
        let Some(path) = self.selected_file.clone() else {
            self.show_status("Please select a file first", Severity::Error);
            return None;
        };

        self.show_status("Uploading file...", Severity::Loading);
        tracing::info!("Upload requested: {}", path.display());
        Some(UploadTask { path })
    }

    pub fn finish_upload(&mut self, result: Result<UploadOutcome, ApiError>) {
        match result {
            Ok(UploadOutcome::Accepted { filename }) => {
                tracing::info!("Upload accepted as '{}'", filename);
                self.show_status("File uploaded successfully!", Severity::Success);
                self.session.set_active_file(filename.clone());
                self.query_enabled = true;
                self.add_message(
                    format!("I've processed \"{}\". What would you like to know about it?", filename),
                    Sender::Bot,
                    None,
                );
            }
            Ok(UploadOutcome::Rejected { error }) => {
                tracing::warn!("Upload rejected: {}", error);
                self.show_status(format!("Error: {}", error), Severity::Error);
            }
            Err(e) => {
                tracing::warn!("Upload failed: {}", e);
                self.show_status(format!("Error: {}", e), Severity::Error);
            }
        }
    }

    /// Returns the query to run. Disabled controls and blank input send nothing.
    pub fn send_query(&mut self) -> Option<QueryTask> {
        if !self.query_enabled {
            return None;
        }
        let query = self.query_input.trim().to_string();
        if query.is_empty() {
            return None;
        }

        self.add_message(query.clone(), Sender::User, None);
        self.query_input.clear();

        let id = self.next_correlation_id();
        self.add_message(THINKING_TEXT, Sender::Bot, Some(id));

        let request = QueryRequest {
            query,
            filename: self.session.active_file().map(str::to_string),
            model: self.selected_model().to_string(),
        };
        tracing::info!("Query {} sent with model '{}'", id, request.model);
        Some(QueryTask { id, request })
    }

    pub fn finish_query(&mut self, id: CorrelationId, result: Result<QueryOutcome, ApiError>) {
        if !self.transcript.remove(id) {
            tracing::debug!("Placeholder {} already gone", id);
        }

        let text = match result {
            Ok(QueryOutcome::Answer(text)) => text,
            Ok(QueryOutcome::Failed(error)) => format!("Error: {}", error),
            Err(e) => {
                tracing::warn!("Query {} failed: {}", id, e);
                format!("Error: {}", e)
            }
        };
        self.add_message(text, Sender::Bot, None);
    }

    pub fn next_model(&mut self) {
        if self.models.is_empty() { return; }
        self.selected_model = (self.selected_model + 1) % self.models.len();
    }

    pub fn previous_model(&mut self) {
        if self.models.is_empty() { return; }
        self.selected_model = if self.selected_model == 0 { self.models.len() - 1 } else { self.selected_model - 1 };
    }

    /// Placeholders of in-flight queries are kept so their answers still land.
    pub fn clear_transcript(&mut self) {
        self.transcript.clear_finalized();
    }

    // ------------------------------------------------------------------
    // View helpers
    // ------------------------------------------------------------------

    pub fn add_message(&mut self, text: impl Into<String>, sender: Sender, correlation: Option<CorrelationId>) {
        self.transcript.push(ChatMessage { text: text.into(), sender, correlation });
    }

    pub fn show_status(&mut self, text: impl Into<String>, severity: Severity) {
        let text = text.into();
        tracing::debug!("Status [{}]: {}", severity.class(), text);
        self.status = Some(Status { text, severity });
    }

    fn next_correlation_id(&mut self) -> CorrelationId {
        self.next_correlation += 1;
        CorrelationId(self.next_correlation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn widget() -> Widget {
        Widget::new(
            vec!["gemma:2b".to_string(), "llama3:8b".to_string(), "mistral:7b".to_string()],
            "llama3:8b",
        )
    }

    fn ready_widget(filename: &str) -> Widget {
        let mut w = widget();
        w.select_file(Some(PathBuf::from(format!("/tmp/{}", filename))));
        w.submit_upload().unwrap();
        w.finish_upload(Ok(UploadOutcome::Accepted { filename: filename.to_string() }));
        w
    }

    fn transport_error(msg: &str) -> ApiError {
        ApiError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, msg.to_string()))
    }

    fn type_query(w: &mut Widget, text: &str) {
        *w.query_input_mut() = text.to_string();
    }

    #[test]
    fn test_select_file_updates_label() {
        let mut w = widget();
        assert_eq!(w.file_label(), NO_FILE_LABEL);

        w.select_file(Some(PathBuf::from("/home/me/docs/report.pdf")));
        assert_eq!(w.file_label(), "report.pdf");

        w.select_file(None);
        assert_eq!(w.file_label(), NO_FILE_LABEL);
    }

    #[test]
    fn test_upload_without_file_is_refused() {
        let mut w = widget();
        assert!(w.submit_upload().is_none());

        let status = w.status().unwrap();
        assert_eq!(status.text, "Please select a file first");
        assert_eq!(status.severity, Severity::Error);
        assert!(w.transcript().messages().is_empty());
    }

    #[test]
    fn test_upload_shows_loading_then_success() {
        let mut w = widget();
        w.select_file(Some(PathBuf::from("report.pdf")));

        let task = w.submit_upload().unwrap();
        assert_eq!(task.path, PathBuf::from("report.pdf"));
        assert_eq!(w.status().unwrap().text, "Uploading file...");
        assert_eq!(w.status().unwrap().severity.class(), "loading");
        assert_eq!(w.mode(), Mode::NoFileReady);

        w.finish_upload(Ok(UploadOutcome::Accepted { filename: "report.pdf".to_string() }));

        assert_eq!(w.mode(), Mode::FileReady);
        assert!(w.query_enabled());
        assert_eq!(w.session().active_file(), Some("report.pdf"));
        assert_eq!(w.status().unwrap().severity, Severity::Success);

        let last = w.transcript().messages().last().unwrap();
        assert_eq!(last.text, "I've processed \"report.pdf\". What would you like to know about it?");
        assert_eq!(last.sender, Sender::Bot);
    }

    #[test]
    fn test_rejected_upload_keeps_controls_disabled() {
        let mut w = widget();
        w.select_file(Some(PathBuf::from("song.mp3")));
        w.submit_upload().unwrap();
        w.finish_upload(Ok(UploadOutcome::Rejected { error: "File type not allowed".to_string() }));

        assert_eq!(w.status().unwrap().text, "Error: File type not allowed");
        assert_eq!(w.status().unwrap().severity, Severity::Error);
        assert_eq!(w.mode(), Mode::NoFileReady);
        assert!(w.session().active_file().is_none());
    }

    #[test]
    fn test_failed_upload_after_success_keeps_file_ready() {
        let mut w = ready_widget("a.pdf");
        w.select_file(Some(PathBuf::from("b.pdf")));
        w.submit_upload().unwrap();
        w.finish_upload(Err(transport_error("Failed to fetch")));

        assert_eq!(w.status().unwrap().text, "Error: Failed to fetch");
        assert_eq!(w.mode(), Mode::FileReady);
        assert_eq!(w.session().active_file(), Some("a.pdf"));
    }

    #[test]
    fn test_second_upload_replaces_active_file() {
        let mut w = ready_widget("a.pdf");
        w.select_file(Some(PathBuf::from("b.csv")));
        w.submit_upload().unwrap();
        w.finish_upload(Ok(UploadOutcome::Accepted { filename: "b.csv".to_string() }));

        assert_eq!(w.mode(), Mode::FileReady);
        assert_eq!(w.session().active_file(), Some("b.csv"));
    }

    #[test]
    fn test_query_disabled_before_upload() {
        let mut w = widget();
        type_query(&mut w, "hello");
        assert!(w.send_query().is_none());
        assert!(w.transcript().messages().is_empty());
        assert_eq!(w.query_input(), "hello");
    }

    #[test]
    fn test_blank_query_is_ignored() {
        let mut w = ready_widget("report.pdf");
        let before = w.transcript().messages().len();

        type_query(&mut w, "  ");
        assert!(w.send_query().is_none());
        assert_eq!(w.transcript().messages().len(), before);
    }

    #[test]
    fn test_send_query_appends_user_and_placeholder() {
        let mut w = ready_widget("report.pdf");
        let before = w.transcript().messages().len();

        type_query(&mut w, "  hello  ");
        let task = w.send_query().unwrap();

        assert_eq!(w.query_input(), "");
        let msgs = w.transcript().messages();
        assert_eq!(msgs.len(), before + 2);
        assert_eq!(msgs[before].text, "hello");
        assert_eq!(msgs[before].sender, Sender::User);
        assert_eq!(msgs[before + 1].text, THINKING_TEXT);
        assert_eq!(msgs[before + 1].correlation, Some(task.id));

        assert_eq!(task.request.query, "hello");
        assert_eq!(task.request.filename.as_deref(), Some("report.pdf"));
        assert_eq!(task.request.model, "llama3:8b");
    }

    #[test]
    fn test_answer_replaces_placeholder() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "summary?");
        let task = w.send_query().unwrap();
        let before = w.transcript().messages().len();

        w.finish_query(task.id, Ok(QueryOutcome::Answer("It is a report.".to_string())));

        assert_eq!(w.transcript().messages().len(), before);
        assert!(!w.transcript().has_placeholders());
        let last = w.transcript().messages().last().unwrap();
        assert_eq!(last.text, "It is a report.");
        assert_eq!(last.sender, Sender::Bot);
    }

    #[test]
    fn test_backend_error_is_prefixed() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "summary?");
        let task = w.send_query().unwrap();

        w.finish_query(task.id, Ok(QueryOutcome::Failed("File not found".to_string())));
        assert_eq!(w.transcript().messages().last().unwrap().text, "Error: File not found");
    }

    #[test]
    fn test_transport_error_removes_placeholder() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "summary?");
        let task = w.send_query().unwrap();

        w.finish_query(task.id, Err(transport_error("Failed to fetch")));

        assert!(!w.transcript().has_placeholders());
        let last = w.transcript().messages().last().unwrap();
        assert_eq!(last.text, "Error: Failed to fetch");
        assert_eq!(last.sender, Sender::Bot);
    }

    #[test]
    fn test_concurrent_queries_resolve_out_of_order() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "first");
        let first = w.send_query().unwrap();
        type_query(&mut w, "second");
        let second = w.send_query().unwrap();
        assert_ne!(first.id, second.id);

        w.finish_query(second.id, Ok(QueryOutcome::Answer("answer two".to_string())));
        let remaining: Vec<_> = w.transcript().messages().iter().filter_map(|m| m.correlation).collect();
        assert_eq!(remaining, vec![first.id]);

        w.finish_query(first.id, Ok(QueryOutcome::Answer("answer one".to_string())));
        assert!(!w.transcript().has_placeholders());

        let texts: Vec<_> = w.transcript().messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(&texts[texts.len() - 4..], ["first", "second", "answer two", "answer one"]);
    }

    #[test]
    fn test_finish_query_with_missing_placeholder_still_appends() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "q");
        let task = w.send_query().unwrap();
        w.finish_query(task.id, Ok(QueryOutcome::Answer("one".to_string())));
        let before = w.transcript().messages().len();

        w.finish_query(task.id, Ok(QueryOutcome::Answer("two".to_string())));
        assert_eq!(w.transcript().messages().len(), before + 1);
    }

    #[test]
    fn test_model_cycling() {
        let mut w = widget();
        assert_eq!(w.selected_model(), "llama3:8b");
        w.next_model();
        assert_eq!(w.selected_model(), "mistral:7b");
        w.next_model();
        assert_eq!(w.selected_model(), "gemma:2b");
        w.previous_model();
        assert_eq!(w.selected_model(), "mistral:7b");
    }

    #[test]
    fn test_unknown_initial_model_falls_back_to_first() {
        let w = Widget::new(vec!["gemma:2b".to_string()], "gpt-4");
        assert_eq!(w.selected_model(), "gemma:2b");
    }

    #[test]
    fn test_clear_keeps_inflight_placeholders() {
        let mut w = ready_widget("report.pdf");
        type_query(&mut w, "q");
        let task = w.send_query().unwrap();

        w.clear_transcript();
        assert_eq!(w.transcript().messages().len(), 1);
        assert!(w.transcript().has_placeholders());

        w.finish_query(task.id, Ok(QueryOutcome::Answer("a".to_string())));
        assert_eq!(w.transcript().messages().len(), 1);
        assert_eq!(w.transcript().messages().last().unwrap().text, "a");
    }

    #[test]
    fn test_append_repins_view() {
        let mut w = widget();
        w.transcript_mut().release_bottom();
        assert!(!w.transcript().follow_bottom());
        w.add_message("hi", Sender::Bot, None);
        assert!(w.transcript().follow_bottom());
    }
}
