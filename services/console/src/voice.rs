//! Speech playback through a locally installed text-to-speech command.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use skillsync_core::content::{Segment, segments};
use skillsync_core::speech::{Capability, SpeechSynthesizer};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    EspeakNg,
    Espeak,
    Say,
}

impl Engine {
    const SEARCH_ORDER: [(&'static str, Engine); 3] = [
        ("espeak-ng", Engine::EspeakNg),
        ("espeak", Engine::Espeak),
        ("say", Engine::Say),
    ];
}

/// Reads text aloud by running `espeak-ng`, `espeak` or macOS `say`.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: PathBuf,
    engine: Engine,
}

impl CommandSynthesizer {
    /// Looks for a supported command on `PATH`.
    pub fn detect() -> Capability<Arc<dyn SpeechSynthesizer>> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        match Self::find(&path) {
            Some(synth) => {
                info!(program = %synth.program.display(), "Speech output available");
                Capability::Available(Arc::new(synth))
            }
            None => {
                info!("No text-to-speech command found, speech output disabled");
                Capability::Unavailable
            }
        }
    }

    fn find(path: &std::ffi::OsStr) -> Option<Self> {
        Engine::SEARCH_ORDER.iter().find_map(|(name, engine)| {
            std::env::split_paths(path)
                .map(|dir| dir.join(name))
                .find(|candidate| is_executable(candidate))
                .map(|program| Self {
                    program,
                    engine: *engine,
                })
        })
    }

    fn args(&self, text: &str, locale: &str) -> Vec<String> {
        match self.engine {
            Engine::EspeakNg | Engine::Espeak => {
                vec!["-v".to_string(), espeak_voice(locale).to_string(), text.to_string()]
            }
            Engine::Say => match say_voice(locale) {
                Some(voice) => vec!["-v".to_string(), voice.to_string(), text.to_string()],
                None => vec![text.to_string()],
            },
        }
    }
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

fn espeak_voice(locale: &str) -> &'static str {
    match locale {
        "zh-CN" => "cmn",
        "es-ES" => "es",
        "fr-FR" => "fr",
        _ => "en-us",
    }
}

fn say_voice(locale: &str) -> Option<&'static str> {
    match locale {
        "zh-CN" => Some("Ting-Ting"),
        "es-ES" => Some("Monica"),
        "fr-FR" => Some("Thomas"),
        _ => None,
    }
}

/// The narrative as it should be heard: cue directives and markdown
/// emphasis are dropped.
pub fn spoken_text(narrative: &str) -> String {
    segments(narrative)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Text(text) => Some(text),
            Segment::Cue(_) => None,
        })
        .collect::<String>()
        .replace(['*', '#', '`'], "")
        .trim()
        .to_string()
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str, locale: &str) -> Result<()> {
        let text = spoken_text(text);
        if text.is_empty() {
            return Ok(());
        }
        debug!(program = %self.program.display(), %locale, "Speaking");

        // Aborting the playback task drops this future, which kills the child.
        let status = tokio::process::Command::new(&self.program)
            .args(self.args(&text, locale))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .context("Failed to run text-to-speech command")?;

        if !status.success() {
            bail!("{} exited with {status}", self.program.display());
        }
        Ok(())
    }
}
