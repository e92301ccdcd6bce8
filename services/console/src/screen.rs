//! Terminal rendering of the session view and parsing of typed commands.
//!
//! The screen is append-only: each published [`Session`] is compared with
//! what was already printed and only the difference is written. Image cues
//! are shown as a placeholder panel the moment their directive is revealed
//! and completed later, when the slot resolves.

use skillsync_core::client::{ImageData, SimulationApi};
use skillsync_core::content::{Segment, segments, unfinished_cue};
use skillsync_core::engine::SessionCommand;
use skillsync_core::images::{CueBoard, ImageState};
use skillsync_core::models::Language;
use skillsync_core::session::Session;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const HELP: &str = "\
Type an action and press Enter.
  /lang <name>   switch language (English, 中文, Español, Français)
  /sound         toggle sound effects
  /listen        dictate the next action
  /speak         read the current narrative aloud
  /skip          show the rest of the narrative at once
  /help          show this help
  /quit          leave the simulation";

/// What a typed line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(SessionCommand),
    Help,
    Quit,
    Invalid(String),
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Command(SessionCommand::Submit(line.to_string()));
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    match name.to_lowercase().as_str() {
        "lang" | "language" => match arg.parse::<Language>() {
            Ok(language) => Input::Command(SessionCommand::SetLanguage(language)),
            Err(e) => Input::Invalid(e.to_string()),
        },
        "sound" | "mute" => Input::Command(SessionCommand::ToggleSound),
        "listen" | "mic" => Input::Command(SessionCommand::Listen),
        "speak" => Input::Command(SessionCommand::Speak),
        "skip" => Input::Command(SessionCommand::SkipReveal),
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => Input::Invalid(format!("Unknown command '/{other}'")),
    }
}

/// A cue slot finished resolving.
#[derive(Debug, Clone)]
pub struct ImageNotice {
    generation: u64,
    cue: String,
    index: usize,
    state: ImageState,
}

pub struct Screen<W: Write> {
    out: W,
    board: CueBoard,
    image_dir: Option<PathBuf>,
    notices: mpsc::UnboundedSender<ImageNotice>,
    /// Bumped for every narrative; late notices from older ones are dropped.
    generation: u64,
    narrative: String,
    segment: usize,
    segment_offset: usize,
    finished: bool,
    last_pending: bool,
    last_listening: bool,
    last_sound: Option<bool>,
    last_language: Option<Language>,
}

impl<W: Write> Screen<W> {
    pub fn new(
        out: W,
        api: Arc<dyn SimulationApi>,
        image_dir: Option<PathBuf>,
    ) -> (Self, mpsc::UnboundedReceiver<ImageNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let screen = Self {
            out,
            board: CueBoard::new(api),
            image_dir,
            notices,
            generation: 0,
            narrative: String::new(),
            segment: 0,
            segment_offset: 0,
            finished: true,
            last_pending: false,
            last_listening: false,
            last_sound: None,
            last_language: None,
        };
        (screen, rx)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Prints whatever changed since the previous call.
    pub fn render(&mut self, session: &Session) -> io::Result<()> {
        if self.last_language != Some(session.language()) {
            writeln!(self.out, "[LANGUAGE: {}]", session.language().native_name())?;
            self.last_language = Some(session.language());
        }
        if self.last_sound != Some(session.is_sound_on()) {
            let label = if session.is_sound_on() { "ON" } else { "OFF" };
            writeln!(self.out, "[SOUND {label}]")?;
            self.last_sound = Some(session.is_sound_on());
        }
        if session.is_listening() && !self.last_listening {
            writeln!(self.out, "[LISTENING...]")?;
        }
        self.last_listening = session.is_listening();

        if session.is_pending() && !self.last_pending {
            writeln!(self.out, "\nPROCESSING...")?;
        }
        let resolved = self.last_pending && !session.is_pending();
        self.last_pending = session.is_pending();

        if resolved || session.raw_response_text() != self.narrative {
            self.begin_narrative(session)?;
        }
        self.stream(session)?;
        self.out.flush()
    }

    fn begin_narrative(&mut self, session: &Session) -> io::Result<()> {
        self.generation += 1;
        self.narrative = session.raw_response_text().to_string();
        self.segment = 0;
        self.segment_offset = 0;
        self.finished = self.narrative.is_empty();
        self.board.clear();
        if !self.narrative.is_empty() {
            writeln!(self.out, "\n== STATUS: {} ==", session.status())?;
        }
        Ok(())
    }

    fn stream(&mut self, session: &Session) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        let revealed = session.revealed_text();
        let settled = if session.is_fully_revealed() {
            revealed
        } else {
            &revealed[..unfinished_cue(revealed).unwrap_or(revealed.len())]
        };

        let parts = segments(settled);
        for (index, part) in parts.iter().enumerate().skip(self.segment) {
            match part {
                Segment::Text(text) => {
                    let from = if index == self.segment {
                        printed_prefix(text, self.segment_offset)
                    } else {
                        0
                    };
                    write!(self.out, "{}", &text[from..])?;
                    self.segment = index;
                    self.segment_offset = text.len();
                }
                Segment::Cue(cue) => {
                    writeln!(self.out, "\n+-- VISUAL DATA: {}", cue.to_uppercase())?;
                    writeln!(self.out, "|   RENDERING SCHEMATIC...")?;
                    self.segment = index + 1;
                    self.segment_offset = 0;
                }
            }
        }

        for index in self.board.sync(settled) {
            self.watch_slot(index);
        }

        if session.is_fully_revealed() {
            writeln!(self.out, "\n")?;
            self.finished = true;
        }
        Ok(())
    }

    fn watch_slot(&self, index: usize) {
        let Some(slot) = self.board.slots().get(index) else {
            return;
        };
        let mut slot = slot.clone();
        let cue = slot.cue().to_string();
        let generation = self.generation;
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let state = slot.resolved().await;
            let _ = notices.send(ImageNotice {
                generation,
                cue,
                index,
                state,
            });
        });
    }

    /// Completes the panel of a resolved cue.
    pub fn show_image(&mut self, notice: ImageNotice) -> io::Result<()> {
        if notice.generation != self.generation {
            return Ok(());
        }
        let title = notice.cue.to_uppercase();
        let detail = match &notice.state {
            ImageState::Ready(ImageData::Remote(url)) => url.clone(),
            ImageState::Ready(image @ ImageData::Inline { mime, bytes }) => {
                match self.save_image(&notice, image) {
                    Some(path) => path.display().to_string(),
                    None => format!("{mime}, {} bytes", bytes.len()),
                }
            }
            ImageState::Loading | ImageState::Failed => "SCHEMATIC UNAVAILABLE".to_string(),
        };
        writeln!(self.out, "+-- VISUAL DATA: {title} -> {detail}")?;
        self.out.flush()
    }

    fn save_image(&self, notice: &ImageNotice, image: &ImageData) -> Option<PathBuf> {
        let dir = self.image_dir.as_ref()?;
        let ImageData::Inline { bytes, .. } = image else {
            return None;
        };
        let path = dir.join(format!(
            "{}-{}-{}.{}",
            slug(&notice.cue),
            notice.generation,
            notice.index,
            image.extension()
        ));
        let written = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, bytes));
        match written {
            Ok(()) => {
                info!(path = %path.display(), "Schematic saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not save schematic");
                None
            }
        }
    }

    /// Prints a one-line notice outside the narrative flow.
    pub fn notice(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "[{message}]")?;
        self.out.flush()
    }
}

/// How much of `text` is already on screen, given `offset` bytes were printed
/// for this segment before. Clamped to the segment and to a char boundary.
fn printed_prefix(text: &str, offset: usize) -> usize {
    let mut from = offset.min(text.len());
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    from
}

fn slug(cue: &str) -> String {
    let slug: String = cue
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "schematic".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skillsync_core::client::{ClientError, SimulateOutcome};
    use skillsync_core::models::SimulateRequest;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct StubApi {
        prompts: Mutex<Vec<String>>,
        inline: bool,
    }

    #[async_trait]
    impl SimulationApi for StubApi {
        async fn simulate(&self, _request: &SimulateRequest) -> Result<String, ClientError> {
            Ok(String::new())
        }

        async fn start_simulation(&self) -> Result<String, ClientError> {
            Ok(String::new())
        }

        async fn generate_image(&self, prompt: &str) -> Result<ImageData, ClientError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.inline {
                Ok(ImageData::Inline {
                    mime: "image/png".to_string(),
                    bytes: vec![137, 80, 78, 71],
                })
            } else {
                Ok(ImageData::Remote(format!("https://img.test/{prompt}")))
            }
        }
    }

    fn resolved(narrative: &str) -> Session {
        let mut session = Session::new(Language::English, true);
        session.begin_submit("inspect").unwrap();
        session.resolve(SimulateOutcome::Delivered(narrative.to_string()));
        session
    }

    fn output(screen: Screen<Vec<u8>>) -> String {
        String::from_utf8(screen.into_inner()).unwrap()
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(
            parse_input("  open the valve "),
            Input::Command(SessionCommand::Submit("open the valve".into()))
        );
        assert_eq!(
            parse_input("/lang 中文"),
            Input::Command(SessionCommand::SetLanguage(Language::Chinese))
        );
        assert_eq!(
            parse_input("/LANG french"),
            Input::Command(SessionCommand::SetLanguage(Language::French))
        );
        assert!(matches!(parse_input("/lang klingon"), Input::Invalid(_)));
        assert_eq!(parse_input("/sound"), Input::Command(SessionCommand::ToggleSound));
        assert_eq!(parse_input("/skip"), Input::Command(SessionCommand::SkipReveal));
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("   "), Input::Empty);
        assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
    }

    #[tokio::test]
    async fn test_streams_only_new_text() {
        let (mut screen, _notices) = Screen::new(Vec::new(), Arc::new(StubApi::default()), None);
        let mut session = resolved("Trainer: The pump hums.");

        session.reveal_to(4);
        screen.render(&session).unwrap();
        session.reveal_to(8);
        screen.render(&session).unwrap();
        screen.render(&session).unwrap();
        session.reveal_all();
        screen.render(&session).unwrap();

        let text = output(screen);
        assert!(text.contains("== STATUS: ACTIVE =="));
        assert_eq!(text.matches("The pump hums.").count(), 1);
        assert!(!text.contains("Trainer"));
    }

    #[tokio::test]
    async fn test_cue_directive_becomes_panel() {
        let api = Arc::new(StubApi::default());
        let (mut screen, mut notices) = Screen::new(Vec::new(), api.clone(), None);
        let mut session = resolved("Check this [Image of pressure gauge] now.");

        // Partial directive is held back.
        session.reveal_to(18);
        screen.render(&session).unwrap();
        session.reveal_all();
        screen.render(&session).unwrap();

        let notice = notices.recv().await.unwrap();
        screen.show_image(notice).unwrap();

        let text = output(screen);
        assert!(!text.contains("[Image of"));
        assert!(text.contains("VISUAL DATA: PRESSURE GAUGE\n|   RENDERING SCHEMATIC..."));
        assert!(text.contains("VISUAL DATA: PRESSURE GAUGE -> https://img.test/pressure gauge"));
        assert_eq!(*api.prompts.lock().unwrap(), vec!["pressure gauge".to_string()]);
    }

    #[tokio::test]
    async fn test_nested_bracket_cue_revealed_char_by_char() {
        let api = Arc::new(StubApi::default());
        let (mut screen, _notices) = Screen::new(Vec::new(), api.clone(), None);
        let narrative = "Look: [Image of valve [closed]] now";
        let mut session = resolved(narrative);

        for chars in 0..=narrative.chars().count() {
            session.reveal_to(chars);
            screen.render(&session).unwrap();
        }

        let text = output(screen);
        assert!(!text.contains("[Image of"));
        assert_eq!(text.matches("Look: ").count(), 1);
        assert!(text.contains("Look: \n+-- VISUAL DATA: VALVE [CLOSED\n|   RENDERING SCHEMATIC...\n] now"));
        assert_eq!(*api.prompts.lock().unwrap(), vec!["valve [closed".to_string()]);
    }

    #[test]
    fn test_printed_prefix_stays_inside_segment() {
        assert_eq!(printed_prefix("Look: ", 29), 6);
        assert_eq!(printed_prefix("ok ✅", 4), 3);
        assert_eq!(printed_prefix("ok ✅", 6), 6);
        assert_eq!(printed_prefix("", 3), 0);
    }

    #[tokio::test]
    async fn test_inline_image_saved_to_dir() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(StubApi {
            inline: true,
            ..Default::default()
        });
        let (mut screen, mut notices) =
            Screen::new(Vec::new(), api, Some(dir.path().join("schematics")));
        let mut session = resolved("[Image of Relief Valve]");
        session.reveal_all();
        screen.render(&session).unwrap();

        let notice = notices.recv().await.unwrap();
        screen.show_image(notice).unwrap();

        let saved = dir.path().join("schematics").join("relief-valve-1-0.png");
        assert_eq!(std::fs::read(&saved).unwrap(), vec![137, 80, 78, 71]);
        assert!(output(screen).contains(&saved.display().to_string()));
    }

    #[tokio::test]
    async fn test_stale_image_notice_is_dropped() {
        let (mut screen, mut notices) =
            Screen::new(Vec::new(), Arc::new(StubApi::default()), None);
        let mut session = resolved("[Image of valve]");
        session.reveal_all();
        screen.render(&session).unwrap();
        let notice = notices.recv().await.unwrap();

        session.begin_submit("next").unwrap();
        screen.render(&session).unwrap();
        session.resolve(SimulateOutcome::Severed);
        screen.render(&session).unwrap();
        screen.show_image(notice).unwrap();

        let text = output(screen);
        assert!(!text.contains("-> https://img.test/valve"));
        assert!(text.contains("PROCESSING..."));
        assert!(text.contains("== STATUS: CRITICAL =="));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Pressure Gauge #2"), "pressure-gauge--2");
        assert_eq!(slug("!!!"), "schematic");
    }
}
