//! Terminal front end for the voice coach.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`CoachConfig`] (defaults on first run).
//! 3. Wire the cpal microphone, the system speech command and the
//!    OpenAI-compatible client into a [`TurnOrchestrator`].
//! 4. Start the global hotkey thread.
//! 5. Open the session and relay hotkeys and stdin commands until it closes.
//!
//! Usage: `voice-coach [planning|reflection|coaching|motivation|clarification]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use voice_coach::{
    audio::CpalMicrophone,
    config::{CoachConfig, FileSettingsProvider},
    hotkey::{HotkeyBindings, HotkeyEvent, HotkeyListener},
    platform::TerminalSurface,
    recording::RecordingOptions,
    services::{ApiCoachClient, CoachServices},
    speech::CommandSpeechEngine,
    turn::{open_session, Role, SessionKind, TurnDeps, TurnHandle, TurnPhase},
};

const HELP: &str = "commands: r = record/stop, s = skip countdown, a = abort countdown, \
c = complete session, q = quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let kind = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<SessionKind>()?,
        None => SessionKind::default(),
    };

    let config = CoachConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        CoachConfig::default()
    });

    let deps = TurnDeps {
        microphone: Arc::new(CpalMicrophone::from_config(&config.audio)),
        speech: Arc::new(CommandSpeechEngine::from_config(&config.speech)),
        services: CoachServices::from_client(Arc::new(ApiCoachClient::from_config(
            &config.services,
        ))),
        platform: Arc::new(TerminalSurface),
    };
    let (orchestrator, handle) = open_session(
        &FileSettingsProvider::default(),
        kind,
        RecordingOptions::from_config(&config.audio),
        deps,
    )
    .await
    .context("could not open a coaching session")?;
    let session = tokio::spawn(orchestrator.run());

    let voices = handle.voices().await;
    if voices.is_empty() {
        log::info!("Speech: no voices found, replies are text only");
    } else {
        log::info!("Speech: {} voices available", voices.len());
        log::debug!("Speech voices: {}", voices.join(", "));
    }

    let (hotkey_tx, mut hotkey_rx) = mpsc::channel::<HotkeyEvent>(16);
    let _hotkeys = match HotkeyBindings::from_config(&config.hotkey) {
        Ok(bindings) => match HotkeyListener::start(bindings, hotkey_tx) {
            Ok(listener) => Some(listener),
            Err(e) => {
                log::warn!("Global hotkeys unavailable: {e}");
                None
            }
        },
        Err(e) => {
            log::warn!("Global hotkeys disabled: {e}");
            None
        }
    };

    println!("{kind} session. {HELP}");
    handle.open(None).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut status = tokio::time::interval(Duration::from_millis(100));
    let mut printer = StatusPrinter::default();

    loop {
        tokio::select! {
            Some(event) = hotkey_rx.recv() => {
                let result = match event {
                    HotkeyEvent::RecordToggle => handle.toggle_record().await,
                    HotkeyEvent::SkipCountdown => handle.skip().await,
                    HotkeyEvent::AbortCountdown => handle.abort().await,
                    HotkeyEvent::EndSession => handle.complete().await,
                };
                if result.is_err() {
                    break;
                }
            }
            line = stdin.next_line() => {
                let Ok(Some(line)) = line else {
                    handle.close().await?;
                    break;
                };
                let result = match line.trim() {
                    "r" => handle.toggle_record().await,
                    "s" => handle.skip().await,
                    "a" => handle.abort().await,
                    "c" => handle.complete().await,
                    "q" => handle.close().await,
                    "" => Ok(()),
                    other => {
                        println!("unknown command {other:?}; {HELP}");
                        Ok(())
                    }
                };
                if result.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.close().await?;
                break;
            }
            _ = status.tick() => {
                if printer.update(&handle) == TurnPhase::Closed {
                    break;
                }
            }
        }
    }

    // extraction is detached; give it a moment to log before exiting
    session.await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

/// Prints phase changes and new conversation lines.
#[derive(Default)]
struct StatusPrinter {
    phase: Option<TurnPhase>,
    countdown: Option<u32>,
    printed: usize,
}

impl StatusPrinter {
    fn update(&mut self, handle: &TurnHandle) -> TurnPhase {
        let view = handle.view();

        for message in view.messages.iter().skip(self.printed) {
            let speaker = match (message.role, message.is_error) {
                (_, true) => "!",
                (Role::Coach, false) => "coach",
                (Role::User, false) => "you",
            };
            println!("{speaker}> {}", message.content);
        }
        self.printed = view.messages.len();

        if self.phase != Some(view.phase) {
            self.phase = Some(view.phase);
            let mut line = format!("[{}]", view.phase.label());
            if let Some(error) = &view.last_error {
                line.push_str(&format!(" {error}"));
            }
            if let Some(notice) = &view.notice {
                line.push_str(&format!(" {notice}"));
            }
            println!("{line}");
        }

        if view.countdown_remaining != self.countdown {
            self.countdown = view.countdown_remaining;
            if let Some(secs) = self.countdown {
                println!("  recording in {secs}...");
            }
        }

        view.phase
    }
}
