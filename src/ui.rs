use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use crate::app::{App, BackendStatus};
use crate::session::{Activity, ChatRole};

const MAX_INPUT_ROWS: usize = 5;

const CAPABILITIES: [&str; 6] = [
    "Viewing and managing tasks",
    "Checking work orders",
    "Tracking deficiencies",
    "Managing assets",
    "Generating reports",
    "Team and workspace info",
];

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut current_text)));
                }
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
                if found_close {
                    current_text.push_str("**");
                }
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let input_rows = app.input.split('\n').count().clamp(1, MAX_INPUT_ROWS) as u16;

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Min(3),
        Constraint::Length(input_rows + 2),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if let Some(notice) = &app.notice {
        render_notice(notice, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (dot, dot_color) = match &app.backend {
        BackendStatus::Unknown => ("○ checking".to_string(), Color::Gray),
        BackendStatus::Online(status) => (format!("● {}", status), Color::Green),
        BackendStatus::Offline => ("● offline".to_string(), Color::Red),
    };

    let title = Line::from(vec![
        Span::styled(" OpsReady AI Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(dot, Style::default().fg(dot_color)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);
    let subtitle = Line::from(Span::styled(
        " Ask about tasks, work orders, assets, and more",
        Style::default().fg(Color::Gray),
    ));

    let header = Paragraph::new(vec![title, subtitle]).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn welcome_text() -> Text<'static> {
    let dim = Style::default().fg(Color::DarkGray);
    let mut lines = vec![
        Line::from(Span::styled(
            "Welcome to OpsReady AI",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::default(),
        Line::from("I can help you with:"),
    ];
    lines.extend(CAPABILITIES.iter().map(|item| Line::from(format!("  • {}", item))));
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        "Try asking: \"Show me overdue tasks\" or \"What work orders are open?\"",
        dim,
    )));
    Text::from(lines)
}

fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();

    for msg in app.session.messages() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                // Split response into lines and parse markdown
                for line in msg.content.lines() {
                    lines.push(parse_markdown_line(line));
                }
            }
        }
        lines.push(Line::default());
    }

    if app.session.is_pending() {
        lines.push(Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

/// Chat pane body without borders or scrolling
pub fn chat_paragraph(app: &App) -> Paragraph<'static> {
    let text = if app.session.messages().is_empty() && !app.session.is_pending() {
        welcome_text()
    } else {
        Text::from(chat_lines(app))
    };
    Paragraph::new(text).wrap(Wrap { trim: false })
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" {} ", app.backend_url()));

    let chat = chat_paragraph(app)
        .block(block)
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

/// Row and column of the cursor inside multi-line input
fn cursor_row_col(input: &str, cursor: usize) -> (usize, usize) {
    let before: String = input.chars().take(cursor).collect();
    let row = before.matches('\n').count();
    let col = before
        .rsplit('\n')
        .next()
        .map(|line| line.chars().count())
        .unwrap_or(0);
    (row, col)
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let pending = app.session.is_pending();
    let listening = app.session.is_listening();

    let (border_color, title) = if pending {
        (Color::DarkGray, " Waiting for reply... ".to_string())
    } else if listening {
        (Color::Red, " ● Listening... (Ctrl+R to stop) ".to_string())
    } else {
        (Color::Yellow, " Message (Enter to send, Alt+Enter for newline) ".to_string())
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = area.width.saturating_sub(2) as usize;
    let inner_height = area.height.saturating_sub(2) as usize;
    let (row, col) = cursor_row_col(&app.input, app.cursor);

    // Keep the cursor visible: scroll rows vertically, columns horizontally
    let row_offset = (row + 1).saturating_sub(inner_height.max(1));
    let col_offset = if inner_width == 0 {
        0
    } else if col >= inner_width {
        col - inner_width + 1
    } else {
        0
    };

    let text_style = if pending {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };

    let content: Text = if app.input.is_empty() {
        Text::from(Span::styled(
            "Type your message or press Ctrl+R for voice input...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(
            app.input
                .split('\n')
                .skip(row_offset)
                .take(inner_height)
                .map(|line| {
                    let visible: String = line.chars().skip(col_offset).take(inner_width).collect();
                    Line::from(visible)
                })
                .collect::<Vec<_>>(),
        )
    };

    let input = Paragraph::new(content).style(text_style).block(block);
    frame.render_widget(input, area);

    if !pending && app.notice.is_none() {
        let cursor_x = col.saturating_sub(col_offset) as u16;
        let cursor_y = row.saturating_sub(row_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + cursor_y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.session.activity() {
        Activity::Idle => (" READY ", Style::default().bg(Color::Blue).fg(Color::White)),
        Activity::Listening(_) => (" LISTENING ", Style::default().bg(Color::Red).fg(Color::White)),
        Activity::Pending { .. } => (" WAITING ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);
    let disabled_style = Style::default().bg(Color::Black).fg(Color::DarkGray);

    let voice_label = if !app.voice_supported() {
        " voice (n/a) "
    } else if app.session.is_listening() {
        " stop "
    } else {
        " voice "
    };
    let voice_style = if app.session.is_pending() || !app.voice_supported() {
        disabled_style
    } else {
        label_style
    };

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];
    spans.extend(vec![
        Span::styled(" Enter ", key_style),
        Span::styled(" send ", label_style),
        Span::styled(" ^R ", key_style),
        Span::styled(voice_label, voice_style),
        Span::styled(" ^L ", key_style),
        Span::styled(" clear ", label_style),
        Span::styled(" PgUp/PgDn ", key_style),
        Span::styled(" scroll ", label_style),
        Span::styled(" ^C ", key_style),
        Span::styled(" quit ", label_style),
    ]);

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_notice(notice: &str, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7.min(area.height);

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Notice ");

    let text = Text::from(vec![
        Line::from(notice.to_string()),
        Line::default(),
        Line::from(Span::styled("Press any key to continue", Style::default().fg(Color::DarkGray))),
    ]);

    let popup = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
    frame.render_widget(popup, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatClient;
    use crate::session::HistoryToken;
    use crate::session::CaptureId;
    use crate::speech::{SpeechCapability, SpeechError, SpeechRecognizer};
    use crate::tui::AppEvent;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    /// Accepts every capture and never reports back
    struct SilentRecognizer;

    impl SpeechRecognizer for SilentRecognizer {
        fn start(
            &mut self,
            _capture: CaptureId,
            _events: mpsc::UnboundedSender<AppEvent>,
        ) -> Result<(), SpeechError> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ChatClient::new("http://localhost:8000", "/api/chat", "/api/health");
        App::new(client, SpeechCapability::Unsupported, tx)
    }

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut out = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                out.push_str(buffer[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn bold_markdown_becomes_styled_span() {
        let line = parse_markdown_line("Task **Inspect pump** is overdue");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "Inspect pump");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(plain(&line), "Task Inspect pump is overdue");
    }

    #[test]
    fn unclosed_markdown_stays_literal() {
        assert_eq!(plain(&parse_markdown_line("a **b")), "a **b");
        assert_eq!(plain(&parse_markdown_line("****")), "****");
        assert_eq!(plain(&parse_markdown_line("2 * 3")), "2 * 3");
    }

    #[test]
    fn cursor_position_in_multiline_input() {
        assert_eq!(cursor_row_col("", 0), (0, 0));
        assert_eq!(cursor_row_col("ab\ncde", 2), (0, 2));
        assert_eq!(cursor_row_col("ab\ncde", 3), (1, 0));
        assert_eq!(cursor_row_col("ab\ncde", 6), (1, 3));
    }

    #[test]
    fn empty_log_shows_welcome_guide() {
        let mut app = app();
        let screen = draw(&mut app);
        assert!(screen.contains("Welcome to OpsReady AI"));
        assert!(screen.contains("Checking work orders"));
        assert!(screen.contains("READY"));
    }

    #[test]
    fn multiline_reply_keeps_line_breaks() {
        let mut app = app();
        let out = app.session.append_user_message("Show me overdue tasks").unwrap();
        app.session.complete_with_assistant_reply(
            out.ticket,
            "Overdue:\n- Inspect pump\n- Replace filter".into(),
            HistoryToken::default(),
        );

        let lines = chat_lines(&app);
        let text: Vec<String> = lines.iter().map(plain).collect();
        assert_eq!(
            text,
            vec!["You:", "Show me overdue tasks", "", "AI:", "Overdue:", "- Inspect pump", "- Replace filter", ""]
        );

        let screen = draw(&mut app);
        assert!(!screen.contains("Welcome to OpsReady AI"));
        assert!(screen.contains("- Replace filter"));
    }

    #[test]
    fn pending_state_shows_thinking_indicator() {
        let mut app = app();
        app.session.append_user_message("hello").unwrap();
        let screen = draw(&mut app);
        assert!(screen.contains("Thinking."));
        assert!(screen.contains("Waiting for reply"));
        assert!(screen.contains("WAITING"));
    }

    #[test]
    fn notice_is_drawn_over_the_chat() {
        let mut app = app();
        app.notice = Some("Voice input is not available.".into());
        let screen = draw(&mut app);
        assert!(screen.contains("Notice"));
        assert!(screen.contains("Press any key to continue"));
    }

    #[test]
    fn listening_state_is_drawn() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = ChatClient::new("http://localhost:8000", "/api/chat", "/api/health");
        let mut app = App::new(client, SpeechCapability::Supported(Box::new(SilentRecognizer)), tx);

        let screen = draw(&mut app);
        assert!(screen.contains(" voice "));
        assert!(!screen.contains("LISTENING"));

        app.toggle_voice();
        assert!(app.session.is_listening());
        let screen = draw(&mut app);
        assert!(screen.contains("● Listening... (Ctrl+R to stop)"));
        assert!(screen.contains("LISTENING"));
        assert!(screen.contains(" stop "));
        assert!(!screen.contains("READY"));
    }
}
