//! Voice input.
//!
//! A terminal has no built-in speech recognition, so dictation is delegated
//! to an external command that records one utterance and prints the
//! transcript on stdout. Whether voice input exists at all is decided once,
//! when the capability is detected.

use std::env;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::config::SpeechConfig;
use crate::session::CaptureId;
use crate::tui::AppEvent;

/// Terminal outcome of one listening session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Transcript(String),
    Failed(FailReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    NoSpeech,
    Timeout,
    Stopped,
    Exit(Option<i32>),
    Io(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::NoSpeech => write!(f, "no speech detected"),
            FailReason::Timeout => write!(f, "timed out"),
            FailReason::Stopped => write!(f, "stopped"),
            FailReason::Exit(Some(code)) => write!(f, "dictation command exited with {}", code),
            FailReason::Exit(None) => write!(f, "dictation command was killed"),
            FailReason::Io(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("could not start dictation command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub const UNSUPPORTED_NOTICE: &str = "Voice input is not available. \
Set speech.command in the config file or pass --speech-command \
to use a dictation program.";

pub trait SpeechRecognizer: Send {
    /// Begin a single-utterance capture.
    ///
    /// Exactly one `AppEvent::Speech` for `capture` is sent afterwards.
    fn start(
        &mut self,
        capture: CaptureId,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Result<(), SpeechError>;

    /// End the current capture. No-op when nothing is running.
    fn stop(&mut self);
}

pub enum SpeechCapability {
    Supported(Box<dyn SpeechRecognizer>),
    Unsupported,
}

impl SpeechCapability {
    pub fn detect(config: &SpeechConfig) -> Self {
        match config.command.as_deref().map(str::trim) {
            Some(program) if !program.is_empty() && program_exists(program) => {
                log::info!("Voice input via `{}` ({})", program, config.language);
                SpeechCapability::Supported(Box::new(CommandRecognizer::new(config)))
            }
            Some(program) if !program.is_empty() => {
                log::warn!("Dictation command `{}` not found, voice input disabled", program);
                SpeechCapability::Unsupported
            }
            _ => SpeechCapability::Unsupported,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, SpeechCapability::Supported(_))
    }
}

fn program_exists(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    cancel: Option<oneshot::Sender<()>>,
}

impl CommandRecognizer {
    pub fn new(config: &SpeechConfig) -> Self {
        let args = config
            .args
            .iter()
            .map(|arg| arg.replace("{lang}", &config.language))
            .collect();
        Self {
            program: config.command.clone().unwrap_or_default().trim().to_string(),
            args,
            timeout: Duration::from_secs(config.timeout_secs),
            cancel: None,
        }
    }
}

impl SpeechRecognizer for CommandRecognizer {
    fn start(
        &mut self,
        capture: CaptureId,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Result<(), SpeechError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        // Replacing the sender ends any earlier capture still running.
        self.cancel = Some(cancel_tx);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let event = tokio::select! {
                result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                    Err(_) => SpeechEvent::Failed(FailReason::Timeout),
                    Ok(Err(e)) => SpeechEvent::Failed(FailReason::Io(e.to_string())),
                    Ok(Ok(output)) if !output.status.success() => {
                        SpeechEvent::Failed(FailReason::Exit(output.status.code()))
                    }
                    Ok(Ok(output)) => {
                        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                        if text.is_empty() {
                            SpeechEvent::Failed(FailReason::NoSpeech)
                        } else {
                            SpeechEvent::Transcript(text)
                        }
                    }
                },
                _ = cancel_rx => SpeechEvent::Failed(FailReason::Stopped),
            };
            let _ = events.send(AppEvent::Speech { capture, event });
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
