//! Speech synthesis capability.
//!
//! [`SpeechEngine`] is the narrow seam between the [`SpeechQueue`] and
//! whatever actually makes sound.  An utterance lasts exactly as long as the
//! future returned by [`SpeechEngine::speak`]; dropping that future must
//! silence the engine, which is how the queue cancels.
//!
//! [`CommandSpeechEngine`] drives the platform's command-line synthesiser
//! (`say` on macOS, `espeak-ng` / `espeak` elsewhere).
//!
//! [`SpeechQueue`]: super::SpeechQueue

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::config::SpeechConfig;

// ---------------------------------------------------------------------------
// SpeechError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    /// No synthesiser on this platform.  Detected once; never a per-turn
    /// error.
    #[error("speech synthesis is not available")]
    Unsupported,

    #[error("speech engine failed: {0}")]
    Engine(String),
}

// ---------------------------------------------------------------------------
// SpeechEngine trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Capability flag, read once when the queue is built.
    fn is_supported(&self) -> bool;

    /// Voice names the engine offers.  Empty when it cannot list them.
    async fn load_voices(&self) -> Vec<String> {
        Vec::new()
    }

    /// Speak `text`, resolving when the utterance ends naturally.
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn SpeechEngine>) {}
};

// ---------------------------------------------------------------------------
// CommandSpeechEngine
// ---------------------------------------------------------------------------

/// Speaks through a synthesiser child process.  The process is killed when
/// the `speak` future is dropped.
#[derive(Debug, Clone)]
pub struct CommandSpeechEngine {
    program: Option<PathBuf>,
    voice: Option<String>,
    rate_wpm: u32,
}

impl CommandSpeechEngine {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let program = if !config.enabled {
            None
        } else {
            match &config.program {
                Some(program) => Some(PathBuf::from(program)),
                None => detect_program(),
            }
        };

        match &program {
            Some(path) => log::info!("speech: using {}", path.display()),
            None => log::info!("speech: no synthesiser available, replies stay silent"),
        }

        Self {
            program,
            voice: config.voice.clone(),
            rate_wpm: config.rate_wpm,
        }
    }

    fn is_say(program: &Path) -> bool {
        program.file_stem().and_then(|s| s.to_str()) == Some("say")
    }

    fn args(&self, program: &Path, text: &str) -> Vec<String> {
        let rate_flag = if Self::is_say(program) { "-r" } else { "-s" };
        let mut args = vec![rate_flag.to_string(), self.rate_wpm.to_string()];
        if let Some(voice) = &self.voice {
            args.push("-v".into());
            args.push(voice.clone());
        }
        // replies may open with '-'; end option parsing before the text
        args.push("--".into());
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeechEngine {
    fn is_supported(&self) -> bool {
        self.program.is_some()
    }

    async fn load_voices(&self) -> Vec<String> {
        let Some(program) = &self.program else {
            return Vec::new();
        };
        // `say -v ?` lists one voice per line; `espeak --voices` has a
        // header row and the name in the fourth column.
        let (args, column): (&[&str], usize) = if Self::is_say(program) {
            (&["-v", "?"], 0)
        } else {
            (&["--voices"], 3)
        };

        let output = Command::new(program)
            .args(args)
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .skip(usize::from(column > 0))
                .filter_map(|line| line.split_whitespace().nth(column))
                .map(str::to_string)
                .collect(),
            Ok(out) => {
                log::warn!("speech: voice listing exited with {}", out.status);
                Vec::new()
            }
            Err(e) => {
                log::warn!("speech: voice listing failed: {e}");
                Vec::new()
            }
        }
    }

    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let program = self.program.as_ref().ok_or(SpeechError::Unsupported)?;

        let status = Command::new(program)
            .args(self.args(program, text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| SpeechError::Engine(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(SpeechError::Engine(format!(
                "{} exited with {status}",
                program.display()
            )))
        }
    }
}

/// First synthesiser found on `PATH`.
fn detect_program() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &["say"]
    } else {
        &["espeak-ng", "espeak"]
    };
    let path = std::env::var_os("PATH")?;
    candidates.iter().find_map(|name| {
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

// ---------------------------------------------------------------------------
// MockSpeechEngine (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockSpeechEngine;


#[cfg(test)]
mod tests {
    use super::*;

    fn engine(program: &str, voice: Option<&str>) -> CommandSpeechEngine {
        CommandSpeechEngine {
            program: Some(PathBuf::from(program)),
            voice: voice.map(str::to_string),
            rate_wpm: 180,
        }
    }

    #[test]
    fn say_uses_rate_and_voice_flags() {
        let e = engine("/usr/bin/say", Some("Samantha"));
        let args = e.args(Path::new("/usr/bin/say"), "Hello");
        assert_eq!(args, ["-r", "180", "-v", "Samantha", "--", "Hello"]);
    }

    #[test]
    fn espeak_uses_speed_flag() {
        let e = engine("espeak-ng", None);
        let args = e.args(Path::new("espeak-ng"), "Hi there");
        assert_eq!(args, ["-s", "180", "--", "Hi there"]);
    }

    #[test]
    fn text_starting_with_a_dash_is_not_an_option() {
        let e = engine("espeak-ng", Some("en-us"));
        let args = e.args(Path::new("espeak-ng"), "-5 degrees, then -v for verbose");
        assert_eq!(
            args,
            ["-s", "180", "-v", "en-us", "--", "-5 degrees, then -v for verbose"]
        );
    }

    #[test]
    fn disabled_config_is_unsupported() {
        let config = SpeechConfig {
            enabled: false,
            ..SpeechConfig::default()
        };
        assert!(!CommandSpeechEngine::from_config(&config).is_supported());
    }

    #[tokio::test]
    async fn unsupported_engine_refuses_to_speak() {
        let e = CommandSpeechEngine {
            program: None,
            voice: None,
            rate_wpm: 175,
        };
        assert_eq!(e.speak("hi").await, Err(SpeechError::Unsupported));
        assert!(e.load_voices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn mock_counts_active_utterances() {
        let mock = MockSpeechEngine::new(std::time::Duration::from_secs(1));
        let speaker = mock.clone();
        let task = tokio::spawn(async move { speaker.speak("hello").await });

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(mock.active_utterances(), 1);

        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(mock.active_utterances(), 0);
        assert_eq!(mock.spoken(), ["hello"]);
    }
}
