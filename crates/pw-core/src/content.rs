//! Lesson content model and the lookup seam the page controller reads through.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ReadingMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("lesson not found: {lesson_id}")]
    LessonNotFound { lesson_id: String },
    #[error("chapter {chapter_id} not found in lesson {lesson_id}")]
    ChapterNotFound { lesson_id: String, chapter_id: u32 },
    #[error("content unavailable: {0}")]
    Unavailable(String),
}

impl ContentError {
    pub fn is_not_found(&self) -> bool {
        !matches!(self, ContentError::Unavailable(_))
    }
}

/// Read-only lookup of lesson content.
pub trait ContentSource {
    fn lesson(&self, lesson_id: &str) -> Result<LessonContent, ContentError>;

    /// Chapter ids are 1-based within a lesson. The returned chapter carries
    /// the lesson's chapter count in `total_chapters`.
    fn chapter(&self, lesson_id: &str, chapter_id: u32) -> Result<Chapter, ContentError>;
}

impl<S: ContentSource + ?Sized> ContentSource for &S {
    fn lesson(&self, lesson_id: &str) -> Result<LessonContent, ContentError> {
        (**self).lesson(lesson_id)
    }

    fn chapter(&self, lesson_id: &str, chapter_id: u32) -> Result<Chapter, ContentError> {
        (**self).chapter(lesson_id, chapter_id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_time: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl LessonContent {
    pub fn chapter(&self, chapter_id: u32) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == chapter_id)
    }

    pub fn page_count(&self) -> usize {
        self.chapters.iter().map(|c| c.pages.len()).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_time: u32,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub total_chapters: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Content,
    Quiz,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Content => "content",
            PageKind::Quiz => "quiz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content" => Some(PageKind::Content),
            "quiz" => Some(PageKind::Quiz),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: PageKind,
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_mode_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_mode_content: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_mode_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_mode_content: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<QuizQuestion>,
}

impl Page {
    /// Title and body to show in `mode`, plus whether the page had to fall
    /// back to its base text because it has no variant for that mode.
    ///
    /// A mode variant is used only when its content exists; a variant title
    /// without content does not switch.
    pub fn text_for(&self, mode: ReadingMode) -> (&str, &[String], bool) {
        let variant = match mode {
            ReadingMode::Normal => return (self.title.as_str(), self.content.as_slice(), false),
            ReadingMode::Fast => (&self.fast_mode_title, &self.fast_mode_content),
            ReadingMode::Slow => (&self.slow_mode_title, &self.slow_mode_content),
        };
        match variant {
            (title, Some(content)) => (
                title.as_deref().unwrap_or(&self.title),
                content.as_slice(),
                false,
            ),
            (_, None) => (self.title.as_str(), self.content.as_slice(), true),
        }
    }

    pub fn is_quiz(&self) -> bool {
        self.kind == PageKind::Quiz
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub answers: Vec<String>,
    pub correct_answer_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl QuizQuestion {
    pub fn check(&self, answer: usize) -> bool {
        answer == self.correct_answer_index
    }
}

/// Percentage of correct answers, rounded. Unanswered questions count as wrong.
pub fn quiz_score(questions: &[QuizQuestion], answers: &[usize]) -> u32 {
    if questions.is_empty() {
        return 0;
    }
    let correct = questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.check(**a))
        .count();
    ((correct as f64 / questions.len() as f64) * 100.0).round() as u32
}

/// In-memory content, typically loaded from a catalog JSON file.
#[derive(Clone, Debug, Default)]
pub struct StaticContent {
    lessons: Vec<LessonContent>,
}

impl StaticContent {
    pub fn new(lessons: Vec<LessonContent>) -> Self {
        Self { lessons }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let lessons: Vec<LessonContent> = serde_json::from_str(json)?;
        Ok(Self::new(lessons))
    }

    pub fn lessons(&self) -> &[LessonContent] {
        &self.lessons
    }

    fn find(&self, lesson_id: &str) -> Result<&LessonContent, ContentError> {
        self.lessons
            .iter()
            .find(|l| l.id == lesson_id)
            .ok_or_else(|| ContentError::LessonNotFound {
                lesson_id: lesson_id.to_string(),
            })
    }
}

impl ContentSource for StaticContent {
    fn lesson(&self, lesson_id: &str) -> Result<LessonContent, ContentError> {
        self.find(lesson_id).cloned()
    }

    fn chapter(&self, lesson_id: &str, chapter_id: u32) -> Result<Chapter, ContentError> {
        let lesson = self.find(lesson_id)?;
        let mut chapter = lesson
            .chapter(chapter_id)
            .cloned()
            .ok_or_else(|| ContentError::ChapterNotFound {
                lesson_id: lesson_id.to_string(),
                chapter_id,
            })?;
        chapter.total_chapters = lesson.chapters.len() as u32;
        Ok(chapter)
    }
}
