/// Spoken alerts through an external text-to-speech command
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::error::SpeechError;

#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `text`, returning once the utterance has finished
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// Speaks through a command line TTS engine such as `espeak-ng`
///
/// The command is invoked as `<program> -v <voice> <text>`. When that fails the
/// voice is assumed to be missing: the utterance is retried with the engine's
/// default voice, which is used from then on. Only one utterance runs at a
/// time; concurrent callers wait for the current one to finish.
pub struct CommandSpeaker {
    program: String,
    voice: String,
    use_voice: AtomicBool,
    lock: Mutex<()>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            voice: voice.into(),
            use_voice: AtomicBool::new(true),
            lock: Mutex::new(()),
        }
    }

    fn command(&self, text: &str, with_voice: bool) -> Command {
        let mut command = Command::new(&self.program);
        if with_voice {
            command.arg("-v").arg(&self.voice);
        }
        command.arg(text);
        command
    }

    async fn run(&self, text: &str, with_voice: bool) -> Result<(), SpeechError> {
        let status = self
            .command(text, with_voice)
            .status()
            .await
            .map_err(|source| SpeechError::Spawn {
                command: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SpeechError::Failed {
                command: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let _guard = self.lock.lock().await;
        info!("Speaking alert: \"{}\"", text);

        if self.use_voice.load(Ordering::Relaxed) {
            match self.run(text, true).await {
                Ok(()) => {
                    debug!("Finished speaking alert");
                    return Ok(());
                }
                Err(SpeechError::Failed { status, .. }) => {
                    warn!(
                        "Speech language {} is not available ({}), using default",
                        self.voice, status
                    );
                    self.use_voice.store(false, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }

        self.run(text, false).await?;
        debug!("Finished speaking alert");
        Ok(())
    }
}
