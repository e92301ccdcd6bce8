//! Session and Wire Models
//!
//! Data types shared by the session engine and the remote client: conversation
//! turns, the derived status label, the language selection and the JSON
//! payloads exchanged with the simulation service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One message of the conversation history. Never mutated once appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Outcome label derived from the latest narrative.
///
/// `Idle` only exists before the first exchange completes; afterwards the
/// session moves freely between the three live labels.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Idle,
    Active,
    Safe,
    Critical,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Idle => "IDLE",
            Status::Active => "ACTIVE",
            Status::Safe => "SAFE",
            Status::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

/// Languages offered by the simulation screen.
///
/// Serialized with its English display name, which is what the remote service
/// expects in the `language` field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Chinese,
    Spanish,
    French,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::English,
        Language::Chinese,
        Language::Spanish,
        Language::French,
    ];

    /// BCP 47 tag used for speech capture and playback.
    pub fn locale(self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Chinese => "zh-CN",
            Language::Spanish => "es-ES",
            Language::French => "fr-FR",
        }
    }

    /// Label shown in the language selector.
    pub fn native_name(self) -> &'static str {
        match self {
            Language::English => "ENGLISH",
            Language::Chinese => "中文",
            Language::Spanish => "ESPAÑOL",
            Language::French => "FRANÇAIS",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::English => "English",
            Language::Chinese => "Chinese",
            Language::Spanish => "Spanish",
            Language::French => "French",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Language::ALL
            .into_iter()
            .find(|lang| {
                lang.to_string().eq_ignore_ascii_case(wanted)
                    || lang.locale().eq_ignore_ascii_case(wanted)
                    || lang.native_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| UnknownLanguage(wanted.to_string()))
    }
}

/// Body of `POST /simulate`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SimulateRequest {
    pub action: String,
    pub history: Vec<Turn>,
    pub language: Language,
}

/// Body returned by `POST /simulate` and `POST /start-simulation`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NarrativeResponse {
    pub response: String,
}

/// Body of `POST /generate_image`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageResponse {
    pub image: String,
}

/// Acknowledgement returned by `POST /upload`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: String,
    #[serde(default)]
    pub char_count: Option<usize>,
}
