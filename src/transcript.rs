//! Append-only conversation transcripts, one per pipeline stage.
//!
//! Each LLM-backed stage (intent classification, fetch/SQL generation, chart
//! config generation) keeps its own transcript so a follow-up query carries
//! the right context to the right model. A pipeline run appends to the
//! caller-supplied transcripts and returns them updated; it never replaces or
//! truncates history. On a failed run the caller gets its transcripts back at
//! their pre-run state so a retry sees the same history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{Message, Role};

/// Which pipeline stage a transcript belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intent,
    Fetch,
    Config,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intent => "intent",
            Stage::Fetch => "fetch",
            Stage::Config => "config",
        }
    }
}

/// A single role-tagged message in a stage transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub stage: Stage,
}

impl TranscriptEntry {
    fn new(role: Role, content: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            stage,
        }
    }
}

/// An ordered, append-only list of role-tagged messages for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    stage: Stage,
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            entries: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn push_system(&mut self, content: impl Into<String>) -> Uuid {
        self.push(Role::System, content)
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Uuid {
        self.push(Role::User, content)
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> Uuid {
        self.push(Role::Assistant, content)
    }

    fn push(&mut self, role: Role, content: impl Into<String>) -> Uuid {
        let entry = TranscriptEntry::new(role, content, self.stage);
        let id = entry.id;
        self.entries.push(entry);
        id
    }

    /// Append entries produced elsewhere (e.g. by a coalesced fetch handler).
    pub fn extend(&mut self, entries: impl IntoIterator<Item = TranscriptEntry>) {
        self.entries.extend(entries);
    }

    /// Render the transcript as gateway messages, in order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .map(|e| Message {
                role: e.role,
                content: e.content.clone(),
            })
            .collect()
    }
}

/// The three independently threaded stage transcripts of one session.
///
/// Passed into `Pipeline::process` and returned updated; the pipeline owns
/// no transcript state of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTranscripts {
    pub intent: Transcript,
    pub fetch: Transcript,
    pub config: Transcript,
}

impl SessionTranscripts {
    pub fn new() -> Self {
        Self {
            intent: Transcript::new(Stage::Intent),
            fetch: Transcript::new(Stage::Fetch),
            config: Transcript::new(Stage::Config),
        }
    }
}

impl Default for SessionTranscripts {
    fn default() -> Self {
        Self::new()
    }
}
