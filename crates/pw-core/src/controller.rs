//! Chapter page controller: position within a lesson plus the ephemeral
//! reading mode.
//!
//! Time is passed in as milliseconds from any monotonic origin; the
//! controller never reads a clock. A mode entry arms a reset deadline, the
//! caller fires it through [`ChapterController::expire_mode`], and any
//! explicit page move disarms it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::command::NavigationCommand;
use crate::constants::MODE_RESET_MS;
use crate::content::{Chapter, ContentError, ContentSource, Page};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    #[default]
    Normal,
    Fast,
    Slow,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("chapter {chapter_id} of lesson {lesson_id} has no pages")]
    EmptyChapter { lesson_id: String, chapter_id: u32 },
    #[error("page {page_index} out of range for chapter {chapter_id} ({total_pages} pages)")]
    PageOutOfRange {
        chapter_id: u32,
        page_index: usize,
        total_pages: usize,
    },
}

impl NavError {
    /// Lookup misses the caller should answer by returning to the lesson
    /// overview. Everything except an unavailable content source.
    pub fn is_not_found(&self) -> bool {
        match self {
            NavError::Content(e) => e.is_not_found(),
            NavError::EmptyChapter { .. } | NavError::PageOutOfRange { .. } => true,
        }
    }
}

/// Where the reader is. `page_index < total_pages` holds between commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChapterPosition {
    pub lesson_id: String,
    pub chapter_id: u32,
    pub page_index: usize,
    pub total_pages: usize,
    pub total_chapters: u32,
}

impl ChapterPosition {
    /// Fraction of the chapter read, counting the current page.
    pub fn progress(&self) -> f64 {
        (self.page_index + 1) as f64 / self.total_pages as f64
    }

    pub fn is_first_page(&self) -> bool {
        self.page_index == 0
    }

    pub fn is_last_page(&self) -> bool {
        self.page_index + 1 == self.total_pages
    }

    pub fn is_last_chapter(&self) -> bool {
        self.chapter_id >= self.total_chapters
    }
}

/// Leaving the chapter view; the actual navigation belongs to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum Exit {
    /// Finished the last chapter, or closed the reader.
    LessonOverview { lesson_id: String },
    /// Went back past the first page.
    Back,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    PageChanged { page_index: usize },
    ChapterChanged { chapter_id: u32 },
    ModeChanged(ReadingMode),
    Exited(Exit),
}

/// The page to draw, already resolved for the reading mode.
#[derive(Clone, Copy, Debug)]
pub struct PageView<'a> {
    pub page: &'a Page,
    pub title: &'a str,
    pub content: &'a [String],
    pub mode: ReadingMode,
    /// The mode flag is set but the page has no text for it.
    pub fell_back: bool,
}

pub struct ChapterController {
    position: ChapterPosition,
    chapter: Chapter,
    mode: ReadingMode,
    mode_deadline: Option<u64>,
    mode_reset_ms: u64,
    exited: Option<Exit>,
}

impl ChapterController {
    pub fn open<S: ContentSource>(
        content: &S,
        lesson_id: &str,
        chapter_id: u32,
    ) -> Result<Self, NavError> {
        Self::open_at(content, lesson_id, chapter_id, 0)
    }

    /// Open at a specific page, e.g. when resuming.
    pub fn open_at<S: ContentSource>(
        content: &S,
        lesson_id: &str,
        chapter_id: u32,
        page_index: usize,
    ) -> Result<Self, NavError> {
        let chapter = load_chapter(content, lesson_id, chapter_id)?;
        let total_pages = chapter.pages.len();
        if page_index >= total_pages {
            return Err(NavError::PageOutOfRange {
                chapter_id,
                page_index,
                total_pages,
            });
        }
        let position = ChapterPosition {
            lesson_id: lesson_id.to_string(),
            chapter_id,
            page_index,
            total_pages,
            total_chapters: chapter.total_chapters.max(chapter_id),
        };
        Ok(Self {
            position,
            chapter,
            mode: ReadingMode::Normal,
            mode_deadline: None,
            mode_reset_ms: MODE_RESET_MS,
            exited: None,
        })
    }

    pub fn with_mode_reset(mut self, mode_reset_ms: u64) -> Self {
        self.mode_reset_ms = mode_reset_ms;
        self
    }

    pub fn position(&self) -> &ChapterPosition {
        &self.position
    }

    pub fn chapter(&self) -> &Chapter {
        &self.chapter
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    /// When the pending mode reset fires, if one is armed.
    pub fn mode_deadline(&self) -> Option<u64> {
        self.mode_deadline
    }

    pub fn exited(&self) -> Option<&Exit> {
        self.exited.as_ref()
    }

    pub fn current_page(&self) -> &Page {
        &self.chapter.pages[self.position.page_index]
    }

    pub fn view(&self) -> PageView<'_> {
        let page = self.current_page();
        let (title, content, fell_back) = page.text_for(self.mode);
        PageView {
            page,
            title,
            content,
            mode: self.mode,
            fell_back,
        }
    }

    pub fn apply<S: ContentSource>(
        &mut self,
        content: &S,
        command: NavigationCommand,
        now_ms: u64,
    ) -> Result<Transition, NavError> {
        if self.exited.is_some() {
            debug!(?command, "ignoring command after exit");
            return Ok(Transition::Unchanged);
        }

        let transition = match command {
            NavigationCommand::Next => self.next(content, true)?,
            NavigationCommand::Previous => self.previous(),
            NavigationCommand::EnterSlowMode => {
                self.enter_mode(ReadingMode::Slow, now_ms);
                Transition::ModeChanged(ReadingMode::Slow)
            }
            NavigationCommand::EnterFastMode => {
                // Fast mode skips ahead while flagged; the flag survives the move
                let (mode, deadline) = (self.mode, self.mode_deadline);
                self.enter_mode(ReadingMode::Fast, now_ms);
                match self.next(content, false) {
                    Ok(transition) => transition,
                    Err(e) => {
                        self.mode = mode;
                        self.mode_deadline = deadline;
                        return Err(e);
                    }
                }
            }
            NavigationCommand::Cancel => Transition::Unchanged,
        };

        if let Transition::Exited(exit) = &transition {
            self.exited = Some(exit.clone());
        }
        debug!(
            ?command,
            ?transition,
            chapter = self.position.chapter_id,
            page = self.position.page_index,
            mode = ?self.mode,
            "chapter-nav"
        );
        Ok(transition)
    }

    /// Apply a composite command sequence in order, stopping at an exit.
    pub fn apply_all<S: ContentSource>(
        &mut self,
        content: &S,
        commands: &[NavigationCommand],
        now_ms: u64,
    ) -> Result<Vec<Transition>, NavError> {
        let mut transitions = Vec::with_capacity(commands.len());
        for &command in commands {
            let transition = self.apply(content, command, now_ms)?;
            let exited = matches!(transition, Transition::Exited(_));
            transitions.push(transition);
            if exited {
                break;
            }
        }
        Ok(transitions)
    }

    /// Fire the mode-reset timer. Returns true if the mode went back to Normal.
    pub fn expire_mode(&mut self, now_ms: u64) -> bool {
        match self.mode_deadline {
            Some(deadline) if now_ms >= deadline => {
                debug!(mode = ?self.mode, "reading mode expired");
                self.mode = ReadingMode::Normal;
                self.mode_deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Close button: straight back to the lesson overview.
    pub fn close(&mut self) -> Exit {
        let exit = Exit::LessonOverview {
            lesson_id: self.position.lesson_id.clone(),
        };
        self.mode_deadline = None;
        self.exited = Some(exit.clone());
        exit
    }

    fn enter_mode(&mut self, mode: ReadingMode, now_ms: u64) {
        self.mode = mode;
        self.mode_deadline = Some(now_ms.saturating_add(self.mode_reset_ms));
    }

    fn reset_mode(&mut self) {
        self.mode = ReadingMode::Normal;
        self.mode_deadline = None;
    }

    fn next<S: ContentSource>(&mut self, content: &S, explicit: bool) -> Result<Transition, NavError> {
        let pos = &self.position;

        if pos.page_index + 1 < pos.total_pages {
            if explicit {
                self.reset_mode();
            }
            self.position.page_index += 1;
            return Ok(Transition::PageChanged {
                page_index: self.position.page_index,
            });
        }

        if pos.chapter_id < pos.total_chapters {
            let next_id = pos.chapter_id + 1;
            // Look up before touching state so a miss leaves us where we were
            let chapter = load_chapter(content, &pos.lesson_id, next_id)?;
            if explicit {
                self.reset_mode();
            }
            self.position.chapter_id = next_id;
            self.position.page_index = 0;
            self.position.total_pages = chapter.pages.len();
            self.position.total_chapters = chapter.total_chapters.max(next_id);
            self.chapter = chapter;
            return Ok(Transition::ChapterChanged {
                chapter_id: next_id,
            });
        }

        let lesson_id = pos.lesson_id.clone();
        if explicit {
            self.reset_mode();
        }
        Ok(Transition::Exited(Exit::LessonOverview { lesson_id }))
    }

    fn previous(&mut self) -> Transition {
        self.reset_mode();
        if self.position.page_index > 0 {
            self.position.page_index -= 1;
            Transition::PageChanged {
                page_index: self.position.page_index,
            }
        } else {
            Transition::Exited(Exit::Back)
        }
    }
}

fn load_chapter<S: ContentSource>(
    content: &S,
    lesson_id: &str,
    chapter_id: u32,
) -> Result<Chapter, NavError> {
    let chapter = content.chapter(lesson_id, chapter_id)?;
    if chapter.pages.is_empty() {
        return Err(NavError::EmptyChapter {
            lesson_id: lesson_id.to_string(),
            chapter_id,
        });
    }
    Ok(chapter)
}
