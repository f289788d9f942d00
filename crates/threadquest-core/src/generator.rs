//! Narrative generator contract.
//!
//! The generator is a stateless request/response collaborator that writes
//! chapter text and reads free-text replies as votes. Any failure surfaces
//! as `DomainError::Generation`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::model::MatchKind;
use crate::social::Reply;

/// Chapter text produced by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChapter {
    /// Chapter title.
    pub title: String,
    /// Narrative text.
    pub content: String,
    /// Zero or two option descriptions.
    pub options: Vec<String>,
    /// Supporting citations.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Input for the first chapter of a quest.
#[derive(Debug, Clone, Serialize)]
pub struct OpeningPrompt {
    /// Text of the message that started the quest.
    pub seed_text: String,
    /// Who asked for the quest.
    pub author_handle: String,
    /// How many chapters the quest will have.
    pub total_chapters: u32,
}

/// A previously posted chapter as seen by the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterHistoryEntry {
    /// 1-based chapter number.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// Narrative text.
    pub content: String,
    /// Options offered.
    pub options: Vec<String>,
    /// The option the crowd chose, once resolved.
    pub winning_option: Option<u8>,
}

/// Input for every chapter after the first.
#[derive(Debug, Clone, Serialize)]
pub struct NextChapterPrompt {
    /// Premise established by the opening chapter.
    pub premise: String,
    /// All prior chapters, oldest first.
    pub history: Vec<ChapterHistoryEntry>,
    /// The option chosen on the latest chapter.
    pub winning_option: u8,
    /// Number of the chapter to write.
    pub chapter_number: u32,
    /// Total chapters; the final one carries no options.
    pub total_chapters: u32,
}

/// How one reply was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyInterpretation {
    /// 1-based option the reply supports.
    pub selected_option: u8,
    /// Confidence weight in `[0.1, 1.0]`.
    pub weight: f64,
    /// What kind of match produced the weight.
    pub match_kind: MatchKind,
    /// Free-text explanation.
    #[serde(default)]
    pub note: String,
}

/// Interpretations aligned index-for-index with the submitted replies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoteInterpretation {
    /// One entry per reply.
    pub per_reply: Vec<ReplyInterpretation>,
}

/// Produces quest text and reads votes.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Writes the opening chapter from the seed text.
    async fn generate_opening_chapter(
        &self,
        prompt: &OpeningPrompt,
    ) -> Result<GeneratedChapter, DomainError>;

    /// Writes the next chapter following the crowd's choice.
    async fn generate_next_chapter(
        &self,
        prompt: &NextChapterPrompt,
    ) -> Result<GeneratedChapter, DomainError>;

    /// Maps each reply onto one of `options`.
    async fn interpret_votes(
        &self,
        replies: &[Reply],
        options: &[String],
    ) -> Result<VoteInterpretation, DomainError>;
}
