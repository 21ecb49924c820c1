use tokio::sync::mpsc;

use crate::client::{ChatClient, ChatReply, TransportError};
use crate::session::{Activity, CaptureId, Rejected, Session, Ticket};
use crate::speech::{SpeechCapability, SpeechEvent, UNSUPPORTED_NOTICE};
use crate::tui::AppEvent;
use crate::ui;

/// What the header shows about the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Unknown,
    Online(String),
    Offline,
}

pub struct App {
    pub should_quit: bool,
    pub session: Session,

    // Input box
    pub input: String,
    pub cursor: usize,

    // Blocking notice popup
    pub notice: Option<String>,

    // Chat pane
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub animation_frame: u8, // 0-2 for ellipsis animation

    pub backend: BackendStatus,

    client: ChatClient,
    speech: SpeechCapability,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        client: ChatClient,
        speech: SpeechCapability,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            session: Session::new(),
            input: String::new(),
            cursor: 0,
            notice: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            backend: BackendStatus::Unknown,
            client,
            speech,
            events,
        }
    }

    pub fn backend_url(&self) -> &str {
        self.client.base_url()
    }

    pub fn voice_supported(&self) -> bool {
        self.speech.is_supported()
    }

    /// Ask the backend for its health once, in the background.
    pub fn probe_backend(&self) {
        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let status = client.health().await.map_err(|e| e.to_string());
            let _ = events.send(AppEvent::Health(status));
        });
    }

    pub fn on_health(&mut self, status: Result<String, String>) {
        self.backend = match status {
            Ok(status) => {
                log::info!("Backend {} reports: {}", self.client.base_url(), status);
                BackendStatus::Online(status)
            }
            Err(e) => {
                log::warn!("Backend health check failed: {}", e);
                BackendStatus::Offline
            }
        };
    }

    /// Send whatever is in the input box.
    pub fn submit(&mut self) {
        let was_listening = self.session.is_listening();
        let outgoing = match self.session.append_user_message(&self.input) {
            Ok(outgoing) => outgoing,
            Err(Rejected::Empty) => return,
            Err(Rejected::Busy) => {
                log::debug!("Submit ignored, a reply is still pending");
                return;
            }
        };

        if was_listening {
            self.stop_recognizer();
        }

        self.input.clear();
        self.cursor = 0;
        self.scroll_to_bottom();

        log::info!(
            "Sending message {} ({} chars, {})",
            outgoing.ticket,
            outgoing.message.chars().count(),
            if outgoing.history.is_empty() { "new conversation" } else { "continuing" }
        );

        let client = self.client.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = client.exchange(&outgoing.message, &outgoing.history).await;
            let _ = events.send(AppEvent::Exchange {
                ticket: outgoing.ticket,
                outcome,
            });
        });
    }

    pub fn on_exchange_finished(
        &mut self,
        ticket: Ticket,
        outcome: Result<ChatReply, TransportError>,
    ) {
        let stale = matches!(
            self.session.activity(),
            Activity::Pending { ticket: current, stale: true } if current == ticket
        );
        match &outcome {
            Ok(_) if stale => log::info!("Reply {} arrived after clear, discarded", ticket),
            Ok(_) => log::info!("Reply {} received", ticket),
            Err(e) => log::error!("Exchange {} failed: {}", ticket, e),
        }

        if self.session.complete(ticket, outcome) {
            log::debug!("History now holds {} entries", self.session.history().len());
            self.scroll_to_bottom();
        }
    }

    /// Start or stop voice capture.
    pub fn toggle_voice(&mut self) {
        if self.session.is_pending() {
            return;
        }

        if self.session.is_listening() {
            self.session.stop_listening();
            self.stop_recognizer();
            log::info!("Voice capture stopped by user");
            return;
        }

        let SpeechCapability::Supported(recognizer) = &mut self.speech else {
            self.notice = Some(UNSUPPORTED_NOTICE.to_string());
            return;
        };

        let Ok(capture) = self.session.begin_listening() else {
            return;
        };
        if let Err(e) = recognizer.start(capture, self.events.clone()) {
            log::error!("{}", e);
            self.session.finish_listening(capture);
            self.notice = Some(format!("Voice input failed: {}", e));
            return;
        }
        log::info!("Voice capture {} started", capture);
    }

    fn stop_recognizer(&mut self) {
        if let SpeechCapability::Supported(recognizer) = &mut self.speech {
            recognizer.stop();
        }
    }

    pub fn on_speech(&mut self, capture: CaptureId, event: SpeechEvent) {
        if !self.session.finish_listening(capture) {
            log::debug!("Ignoring late result for {}", capture);
            return;
        }
        match event {
            SpeechEvent::Transcript(text) => {
                log::info!("Voice capture {} transcribed", capture);
                self.cursor = text.chars().count();
                self.input = text;
            }
            SpeechEvent::Failed(reason) => {
                log::warn!("Voice capture {} failed: {}", capture, reason);
            }
        }
    }

    pub fn clear_chat(&mut self) {
        if self.session.is_pending() {
            log::info!("Chat cleared while a reply is pending");
        } else {
            log::info!("Chat cleared");
        }
        self.session.clear();
        self.chat_scroll = 0;
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_pending() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let target = usize::from(self.chat_scroll).saturating_add(usize::from(lines));
        self.chat_scroll = clamp_scroll(target.min(self.max_scroll()));
    }

    fn visible_chat_height(&self) -> usize {
        if self.chat_height > 0 {
            usize::from(self.chat_height)
        } else {
            20
        }
    }

    /// Rendered height of the chat pane body, wrapped the way `ui.rs` draws it
    pub fn total_chat_lines(&self) -> usize {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 { self.chat_width } else { 50 };
        ui::chat_paragraph(self).line_count(wrap_width)
    }

    fn max_scroll(&self) -> usize {
        self.total_chat_lines().saturating_sub(self.visible_chat_height())
    }

    /// Scroll chat to the newest message
    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = clamp_scroll(self.max_scroll());
    }
}

/// `Paragraph::scroll` takes a `u16` offset
fn clamp_scroll(offset: usize) -> u16 {
    u16::try_from(offset).unwrap_or(u16::MAX)
}
