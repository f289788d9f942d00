//! Test generator — canned chapters and scripted vote interpretations.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use threadquest_core::error::DomainError;
use threadquest_core::generator::{
    GeneratedChapter, NarrativeGenerator, NextChapterPrompt, OpeningPrompt, ReplyInterpretation,
    VoteInterpretation,
};
use threadquest_core::model::MatchKind;
use threadquest_core::social::Reply;

/// A generator that writes predictable chapters.
///
/// Chapter `n` offers `"Path A{n}"` / `"Path B{n}"` unless it is the final
/// chapter. Replies are read as `"1"` / `"2"` explicit votes unless an
/// interpretation has been scripted with [`ScriptedGenerator::with_interpretation`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    interpretation: Mutex<Option<VoteInterpretation>>,
    failing: AtomicBool,
    opening_calls: AtomicUsize,
    next_prompts: Mutex<Vec<NextChapterPrompt>>,
    interpret_calls: AtomicUsize,
}

impl ScriptedGenerator {
    /// Creates a generator with default behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        let generator = Self::default();
        generator.failing.store(true, Ordering::SeqCst);
        generator
    }

    /// Scripts the result of the next `interpret_votes` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn with_interpretation(self, interpretation: VoteInterpretation) -> Self {
        *self.interpretation.lock().unwrap() = Some(interpretation);
        self
    }

    /// Switches failure mode on or off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of opening chapters generated.
    pub fn opening_calls(&self) -> usize {
        self.opening_calls.load(Ordering::SeqCst)
    }

    /// Prompts received by `generate_next_chapter`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn next_prompts(&self) -> Vec<NextChapterPrompt> {
        self.next_prompts.lock().unwrap().clone()
    }

    /// Number of `interpret_votes` calls.
    pub fn interpret_calls(&self) -> usize {
        self.interpret_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DomainError::Generation("model unavailable".into()))
        } else {
            Ok(())
        }
    }
}

fn read_reply(reply: &Reply) -> ReplyInterpretation {
    let text = reply.text.trim();
    let (selected_option, match_kind) = if text.contains('2') {
        (2, MatchKind::ExplicitNumber)
    } else if text.contains('1') {
        (1, MatchKind::ExplicitNumber)
    } else {
        (1, MatchKind::Unclear)
    };
    ReplyInterpretation {
        selected_option,
        weight: match_kind.default_weight(),
        match_kind,
        note: format!("read {text:?}"),
    }
}

#[async_trait]
impl NarrativeGenerator for ScriptedGenerator {
    async fn generate_opening_chapter(
        &self,
        prompt: &OpeningPrompt,
    ) -> Result<GeneratedChapter, DomainError> {
        self.check_failing()?;
        self.opening_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedChapter {
            title: "The Beginning".into(),
            content: format!("It started with: {}", prompt.seed_text),
            options: vec!["Path A1".into(), "Path B1".into()],
            sources: vec!["https://example.org/source".into()],
        })
    }

    async fn generate_next_chapter(
        &self,
        prompt: &NextChapterPrompt,
    ) -> Result<GeneratedChapter, DomainError> {
        self.check_failing()?;
        self.next_prompts.lock().unwrap().push(prompt.clone());
        let n = prompt.chapter_number;
        let options = if n == prompt.total_chapters {
            Vec::new()
        } else {
            vec![format!("Path A{n}"), format!("Path B{n}")]
        };
        Ok(GeneratedChapter {
            title: format!("Chapter {n}"),
            content: format!("After option {}, the story went on.", prompt.winning_option),
            options,
            sources: Vec::new(),
        })
    }

    async fn interpret_votes(
        &self,
        replies: &[Reply],
        _options: &[String],
    ) -> Result<VoteInterpretation, DomainError> {
        self.check_failing()?;
        self.interpret_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.interpretation.lock().unwrap().clone() {
            return Ok(scripted);
        }
        Ok(VoteInterpretation {
            per_reply: replies.iter().map(read_reply).collect(),
        })
    }
}
