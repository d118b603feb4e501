use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use crate::api::BackendClient;
use crate::config::Config;
use crate::ops::{self, Completion};
use crate::widget::{Mode, Sender, Severity, Widget};

const THROBBER_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

#[derive(PartialEq, Clone, Copy)]
pub enum Focus {
    File,
    Query,
}

pub struct TuiApp {
    pub widget: Widget,
    pub focus: Focus,

    // File picker
    pub file_input: String,
    pub file_cursor: usize,

    // Query input
    pub input_cursor: usize,

    // Transcript scrolling
    pub scroll_offset: u16,
    pub content_height: u16,
    pub viewport_height: u16,

    pub throbber_frame: usize,
    pub should_quit: bool,
}

impl TuiApp {
    pub fn new(widget: Widget, initial_file: Option<PathBuf>) -> Self {
        let mut app = Self {
            widget,
            focus: Focus::File,
            file_input: String::new(),
            file_cursor: 0,
            input_cursor: 0,
            scroll_offset: 0,
            content_height: 0,
            viewport_height: 0,
            throbber_frame: 0,
            should_quit: false,
        };
        if let Some(path) = initial_file {
            app.file_input = path.display().to_string();
            app.file_cursor = app.file_input.len();
            app.sync_file_selection();
        }
        app
    }

    /// Every edit of the path field is a new selection.
    fn sync_file_selection(&mut self) {
        let trimmed = self.file_input.trim();
        let selection = if trimmed.is_empty() { None } else { Some(PathBuf::from(trimmed)) };
        self.widget.select_file(selection);
    }

    pub fn scroll_up(&mut self, amount: u16) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
        self.widget.transcript_mut().release_bottom();
    }

    pub fn scroll_down(&mut self, amount: u16) {
        let max_scroll = self.content_height.saturating_sub(self.viewport_height);
        self.scroll_offset = (self.scroll_offset + amount).min(max_scroll);
        if self.scroll_offset == max_scroll {
            self.widget.transcript_mut().pin_bottom();
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = self.content_height.saturating_sub(self.viewport_height);
        self.widget.transcript_mut().pin_bottom();
    }

    pub fn advance_throbber(&mut self) {
        self.throbber_frame = (self.throbber_frame + 1) % THROBBER_FRAMES.len();
    }

    fn is_busy(&self) -> bool {
        self.widget.transcript().has_placeholders()
            || self.widget.status().is_some_and(|s| s.severity == Severity::Loading)
    }

    /// The field currently receiving keystrokes, with its cursor.
    fn focused_field(&mut self) -> (&mut String, &mut usize) {
        match self.focus {
            Focus::File => (&mut self.file_input, &mut self.file_cursor),
            Focus::Query => (self.widget.query_input_mut(), &mut self.input_cursor),
        }
    }
}

pub fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// DRAWING FUNCTIONS
// ============================================================================

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Loading => Color::Yellow,
        Severity::Success => Color::Green,
        Severity::Error => Color::Red,
    }
}

fn draw(frame: &mut Frame, app: &mut TuiApp) {
    let size = frame.area();

    let (mode_str, mode_color) = match app.widget.mode() {
        Mode::FileReady => (
            format!(" ● Ready: {} ", app.widget.session().active_file().unwrap_or_default()),
            Color::Green,
        ),
        Mode::NoFileReady => (" ○ No file ready ".to_string(), Color::DarkGray),
    };

    let outer_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" DocChat │ {} ", app.widget.selected_model()))
        .title_bottom(Line::from(Span::styled(mode_str, Style::default().fg(mode_color))).right_aligned());

    let inner_area = outer_block.inner(size);
    frame.render_widget(outer_block, size);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // File
            Constraint::Length(1), // Status
            Constraint::Min(5),    // Transcript
            Constraint::Length(1), // Help
            Constraint::Length(3), // Query
        ])
        .split(inner_area);

    draw_file_picker(frame, app, chunks[0]);
    draw_status(frame, app, chunks[1]);
    draw_transcript(frame, app, chunks[2]);

    let help = Paragraph::new("Tab Switch │ Enter Upload/Send │ Ctrl+N/P Model │ Ctrl+L Clear │ Esc Quit")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    frame.render_widget(help, chunks[3]);

    draw_query_input(frame, app, chunks[4]);
}

fn draw_file_picker(frame: &mut Frame, app: &TuiApp, area: ratatui::layout::Rect) {
    let focused = app.focus == Focus::File;
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(if focused { Style::default().fg(Color::Cyan) } else { Style::default().fg(Color::DarkGray) })
        .title(format!(" File: {} ", app.widget.file_label()));
    let input = Paragraph::new(app.file_input.as_str()).block(block).style(Style::default().fg(Color::White));
    frame.render_widget(input, area);

    if focused {
        let cursor_x = area.x + 1 + app.file_cursor as u16;
        frame.set_cursor_position((cursor_x.min(area.x + area.width.saturating_sub(2)), area.y + 1));
    }
}

fn draw_status(frame: &mut Frame, app: &TuiApp, area: ratatui::layout::Rect) {
    let Some(status) = app.widget.status() else { return };

    let text = if status.severity == Severity::Loading {
        format!("{} {}", THROBBER_FRAMES[app.throbber_frame], status.text)
    } else {
        status.text.clone()
    };
    let style = Style::default().fg(severity_color(status.severity)).add_modifier(Modifier::BOLD);
    frame.render_widget(Paragraph::new(Span::styled(text, style)).alignment(Alignment::Center), area);
}

fn draw_transcript(frame: &mut Frame, app: &mut TuiApp, area: ratatui::layout::Rect) {
    app.viewport_height = area.height;

    let max_width = area.width.saturating_sub(4) as usize;
    let mut lines: Vec<Line> = Vec::new();

    for msg in app.widget.transcript().messages() {
        lines.push(Line::from(""));
        if msg.correlation.is_some() {
            lines.push(Line::from(Span::styled(
                format!(" {} {}", THROBBER_FRAMES[app.throbber_frame], msg.text),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            continue;
        }

        let header = match msg.sender {
            Sender::User => Span::styled(" ▶ You ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
            Sender::Bot => Span::styled(" ◆ Assistant ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        };
        lines.push(Line::from(header));

        let body_style = if msg.sender == Sender::Bot && msg.text.starts_with("Error: ") {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        for raw in msg.text.lines() {
            for wrapped in textwrap::wrap(raw, max_width.max(1)) {
                lines.push(Line::from(Span::styled(format!("  {}", wrapped), body_style)));
            }
        }
    }

    // Lines are pre-wrapped above, so one entry is one row
    app.content_height = lines.len() as u16;

    let max_scroll = app.content_height.saturating_sub(app.viewport_height);
    if app.widget.transcript().follow_bottom() { app.scroll_offset = max_scroll; }
    else if app.scroll_offset > max_scroll { app.scroll_offset = max_scroll; }

    let messages = Paragraph::new(Text::from(lines))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll_offset, 0));
    frame.render_widget(messages, area);

    if app.content_height > app.viewport_height {
        let scrollbar = Scrollbar::default()
            .orientation(ScrollbarOrientation::VerticalRight)
            .thumb_style(Style::default().fg(Color::Cyan))
            .track_style(Style::default().fg(Color::DarkGray));
        let mut scrollbar_state = ScrollbarState::new(app.content_height as usize)
            .position(app.scroll_offset as usize)
            .viewport_content_length(app.viewport_height as usize);
        frame.render_stateful_widget(scrollbar, area, &mut scrollbar_state);
    }
}

fn draw_query_input(frame: &mut Frame, app: &TuiApp, area: ratatui::layout::Rect) {
    let enabled = app.widget.query_enabled();
    let focused = app.focus == Focus::Query;

    let (title, border) = if !enabled {
        (" Message (upload a file first) ", Style::default().fg(Color::DarkGray))
    } else if focused {
        (" Message ", Style::default().fg(Color::Cyan))
    } else {
        (" Message ", Style::default().fg(Color::White))
    };
    let block = Block::default().borders(Borders::TOP).border_style(border).title(title);
    let text_style = if enabled { Style::default().fg(Color::White) } else { Style::default().fg(Color::DarkGray) };
    frame.render_widget(Paragraph::new(app.widget.query_input()).block(block).style(text_style), area);

    if focused && enabled {
        let cursor_x = area.x + app.input_cursor as u16;
        frame.set_cursor_position((cursor_x.min(area.x + area.width.saturating_sub(1)), area.y + 1));
    }
}

// ============================================================================
// MAIN APP LOOP
// ============================================================================

pub async fn run_app(client: BackendClient, widget: Widget, initial_file: Option<PathBuf>) -> anyhow::Result<()> {
    let mut app = TuiApp::new(widget, initial_file);
    let mut terminal = setup_terminal()?;

    let tick_rate = Duration::from_millis(80);
    let mut last_tick = Instant::now();

    let (tx, mut rx) = mpsc::channel::<Completion>(32);

    tracing::info!("TUI started against {}", client.base_url());

    let result: anyhow::Result<()> = loop {
        if let Err(e) = terminal.draw(|f| draw(f, &mut app)) {
            break Err(e.into());
        }

        while let Ok(completion) = rx.try_recv() {
            let was_ready = app.widget.mode() == Mode::FileReady;
            completion.apply(&mut app.widget);
            if !was_ready && app.widget.mode() == Mode::FileReady {
                app.focus = Focus::Query;
            }
        }

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    handle_key(&mut app, key, &client, &tx);
                }
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            },
            Ok(false) => {}
            Err(e) => break Err(e.into()),
        }

        if last_tick.elapsed() >= tick_rate {
            if app.is_busy() { app.advance_throbber(); }
            last_tick = Instant::now();
        }

        if app.should_quit { break Ok(()); }
    };

    restore_terminal(&mut terminal)?;
    result
}

// ============================================================================
// INPUT HANDLERS
// ============================================================================

fn handle_key(app: &mut TuiApp, key: KeyEvent, client: &BackendClient, tx: &mpsc::Sender<Completion>) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => app.should_quit = true,
            KeyCode::Char('l') => {
                app.widget.clear_transcript();
                app.scroll_offset = 0;
            }
            KeyCode::Char('n') => change_model(app, true),
            KeyCode::Char('p') => change_model(app, false),
            // Send button
            KeyCode::Char('s') => submit_query(app, client, tx),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => app.should_quit = true,
        KeyCode::Tab | KeyCode::BackTab => {
            app.focus = match app.focus {
                Focus::File if app.widget.query_enabled() => Focus::Query,
                _ => Focus::File,
            };
        }
        KeyCode::Enter => match app.focus {
            Focus::File => {
                if let Some(task) = app.widget.submit_upload() {
                    ops::spawn_upload(client, task, tx);
                }
            }
            Focus::Query => submit_query(app, client, tx),
        },
        KeyCode::Char(c) => {
            if app.focus == Focus::Query && !app.widget.query_enabled() { return; }
            let (field, cursor) = app.focused_field();
            field.insert(*cursor, c);
            *cursor += c.len_utf8();
            if app.focus == Focus::File { app.sync_file_selection(); }
        }
        KeyCode::Backspace => {
            let (field, cursor) = app.focused_field();
            if *cursor > 0 {
                // Find char boundary before cursor
                if let Some(prev_char_idx) = field[..*cursor].char_indices().next_back().map(|(i, _)| i) {
                    field.remove(prev_char_idx);
                    *cursor = prev_char_idx;
                }
            }
            if app.focus == Focus::File { app.sync_file_selection(); }
        }
        KeyCode::Left => {
            let (field, cursor) = app.focused_field();
            if let Some((prev_idx, _)) = field[..*cursor].char_indices().next_back() {
                *cursor = prev_idx;
            }
        }
        KeyCode::Right => {
            let (field, cursor) = app.focused_field();
            let pos = *cursor;
            if pos < field.len() {
                *cursor = field[pos..].char_indices().nth(1).map(|(next, _)| pos + next).unwrap_or(field.len());
            }
        }
        KeyCode::Up => app.scroll_up(3),
        KeyCode::Down => app.scroll_down(3),
        KeyCode::PageUp => app.scroll_up(10),
        KeyCode::PageDown => app.scroll_down(10),
        KeyCode::End => app.scroll_to_bottom(),
        _ => {}
    }
}

fn submit_query(app: &mut TuiApp, client: &BackendClient, tx: &mpsc::Sender<Completion>) {
    if let Some(task) = app.widget.send_query() {
        app.input_cursor = 0;
        ops::spawn_query(client, task, tx);
    }
}

fn change_model(app: &mut TuiApp, forward: bool) {
    if forward { app.widget.next_model(); } else { app.widget.previous_model(); }
    let model = app.widget.selected_model().to_string();
    if let Err(e) = Config::save_model(&model) {
        tracing::warn!("Failed to save model preference: {}", e);
    }
}
