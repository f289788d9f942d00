//! Chapters and their vote options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// The choices offered at the end of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterOptions {
    /// The quest ends here; nothing to vote on.
    Terminal,
    /// Two options to vote between.
    Choices {
        /// Option 1.
        first: String,
        /// Option 2.
        second: String,
    },
}

impl ChapterOptions {
    /// Builds a two-way choice.
    #[must_use]
    pub fn choices(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::Choices {
            first: first.into(),
            second: second.into(),
        }
    }

    /// Converts raw generator output into options for a chapter.
    ///
    /// Terminal chapters ignore whatever options were supplied; other chapters
    /// need exactly two non-blank options.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Generation` if a non-terminal chapter does not
    /// carry exactly two non-blank options.
    pub fn from_generated(options: Vec<String>, terminal: bool) -> Result<Self, DomainError> {
        if terminal {
            return Ok(Self::Terminal);
        }
        let mut iter = options.into_iter().map(|o| o.trim().to_owned());
        match (iter.next(), iter.next(), iter.next()) {
            (Some(first), Some(second), None) if !first.is_empty() && !second.is_empty() => {
                Ok(Self::Choices { first, second })
            }
            _ => Err(DomainError::Generation(
                "chapter must offer exactly two options".to_owned(),
            )),
        }
    }

    /// Returns `true` for the terminal variant.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// Number of options (0 or 2).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Terminal => 0,
            Self::Choices { .. } => 2,
        }
    }

    /// Returns `true` if there is nothing to vote on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_terminal()
    }

    /// Text of the 1-based option `index`.
    #[must_use]
    pub fn option_text(&self, index: u8) -> Option<&str> {
        match (self, index) {
            (Self::Choices { first, .. }, 1) => Some(first),
            (Self::Choices { second, .. }, 2) => Some(second),
            _ => None,
        }
    }

    /// Options as an ordered list.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Terminal => Vec::new(),
            Self::Choices { first, second } => vec![first.clone(), second.clone()],
        }
    }
}

/// One posted narrative unit of a quest.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    /// Chapter identifier.
    pub id: Uuid,
    /// Owning quest.
    pub quest_id: Uuid,
    /// 1-based position within the quest.
    pub chapter_number: u32,
    /// Chapter title.
    pub title: String,
    /// Narrative text.
    pub content: String,
    /// Choices offered to voters.
    pub options: ChapterOptions,
    /// Supporting citations; opaque to the engine.
    pub sources: Vec<String>,
    /// Message id of the posted chapter; empty until posted.
    pub posted_message_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Chapter {
    /// Creates an unposted chapter, checking that the option shape matches
    /// the chapter's position.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `chapter_number` is outside
    /// `1..=total_chapters` or the options are terminal on a non-final
    /// chapter (or vice versa).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quest_id: Uuid,
        chapter_number: u32,
        total_chapters: u32,
        title: String,
        content: String,
        options: ChapterOptions,
        sources: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if chapter_number == 0 || chapter_number > total_chapters {
            return Err(DomainError::Validation(format!(
                "chapter number {chapter_number} outside 1..={total_chapters}"
            )));
        }
        let is_final = chapter_number == total_chapters;
        if options.is_terminal() != is_final {
            return Err(DomainError::Validation(format!(
                "chapter {chapter_number} of {total_chapters} has the wrong option shape"
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            quest_id,
            chapter_number,
            title,
            content,
            options,
            sources,
            posted_message_id: String::new(),
            created_at: now,
        })
    }

    /// Returns `true` once the chapter has been posted.
    #[must_use]
    pub fn is_posted(&self) -> bool {
        !self.posted_message_id.is_empty()
    }

    /// Renders the text posted to the social platform.
    #[must_use]
    pub fn render_post(&self, total_chapters: u32) -> String {
        let mut text = format!(
            "Chapter {}/{}: {}\n\n{}",
            self.chapter_number, total_chapters, self.title, self.content
        );
        match &self.options {
            ChapterOptions::Terminal => text.push_str("\n\nThe end."),
            ChapterOptions::Choices { first, second } => {
                text.push_str(&format!(
                    "\n\n1) {first}\n2) {second}\n\nReply 1 or 2 to vote!"
                ));
            }
        }
        text
    }
}
