//! Pagewise reading core.
//!
//! Turns drag gestures into navigation commands, walks a reader through the
//! pages and chapters of a lesson with ephemeral fast/slow reading modes, and
//! keeps locally held backend tables consistent with a realtime change feed.
//!
//! Zero I/O: time is passed in, content comes through [`ContentSource`], and
//! change events arrive as values.

pub mod achievements;
pub mod change;
pub mod command;
pub mod constants;
pub mod content;
pub mod controller;
pub mod filter;
pub mod gesture;
pub mod reconcile;
pub mod record;

pub use achievements::{ProgressStats, Rule, eligible_awards};
pub use change::{Change, ChangeKind, IngressError, Patch, RawChange};
pub use command::NavigationCommand;
pub use constants::{MODE_RESET_MS, PENDING_EVENT_LIMIT, TOMBSTONE_LIMIT};
pub use content::{
    Chapter, ContentError, ContentSource, LessonContent, Page, PageKind, QuizQuestion,
    StaticContent, quiz_score,
};
pub use controller::{
    ChapterController, ChapterPosition, Exit, NavError, PageView, ReadingMode, Transition,
};
pub use filter::{Filter, FilterError, FilterOp};
pub use gesture::{
    CardOffset, GestureConfig, GestureInterpreter, GesturePhase, GestureSample, GestureStep,
    classify,
};
pub use reconcile::{ApplyOutcome, Reconciler, SyncStatus};
pub use record::{
    Achievement, ChapterRecord, Criteria, Difficulty, Lesson, Profile, ProgressStatus, Record,
    UserAchievement, UserProgress,
};
