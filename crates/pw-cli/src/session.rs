//! Scripted reading session: the reader screen without the screen.
//!
//! Each input line is a button press or a drag; after every input one frame
//! line is written describing what the renderer would draw. The mode-reset
//! timer runs on the tokio clock alongside input, so `wait` lines let it fire.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{Instant, sleep_until};

use pw_core::{
    CardOffset, ChapterController, ContentSource, Exit, GestureConfig, GestureInterpreter,
    GestureSample, GestureStep, NavigationCommand, ReadingMode, Transition,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    /// Footer buttons; they skip the gesture interpreter.
    Button(NavigationCommand),
    Close,
    Drag(GestureSample),
    /// Shorthand for a complete drag ending at (dx, dy).
    Swipe { dx: f32, dy: f32 },
    Wait(u64),
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Input>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    let input = match words.as_slice() {
        ["next"] => Input::Button(NavigationCommand::Next),
        ["prev"] | ["previous"] => Input::Button(NavigationCommand::Previous),
        ["close"] => Input::Close,
        ["swipe", dx, dy] => Input::Swipe {
            dx: number(dx)?,
            dy: number(dy)?,
        },
        ["drag", "start"] => Input::Drag(GestureSample::started()),
        ["drag", "update", dx, dy] => Input::Drag(GestureSample::updated(number(dx)?, number(dy)?)),
        ["drag", "end", dx, dy] => Input::Drag(GestureSample::ended(number(dx)?, number(dy)?)),
        ["wait", ms] => Input::Wait(ms.parse().with_context(|| format!("invalid wait `{ms}`"))?),
        _ => bail!("unrecognized input `{line}`"),
    };
    Ok(Some(input))
}

fn number(s: &str) -> Result<f32> {
    s.parse().with_context(|| format!("invalid number `{s}`"))
}

fn mode_name(mode: ReadingMode) -> &'static str {
    match mode {
        ReadingMode::Normal => "normal",
        ReadingMode::Fast => "fast",
        ReadingMode::Slow => "slow",
    }
}

/// What the reader screen shows after an input.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub chapter_id: u32,
    pub page_index: usize,
    pub total_pages: usize,
    pub mode: ReadingMode,
    pub title: String,
    pub fell_back: bool,
    pub offset: CardOffset,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chapter {} page {}/{} mode={} title={:?}",
            self.chapter_id,
            self.page_index + 1,
            self.total_pages,
            mode_name(self.mode),
            self.title,
        )?;
        if self.fell_back {
            write!(f, " (base text)")?;
        }
        if self.offset != CardOffset::REST {
            write!(
                f,
                " card=({:.0},{:.0}) opacity={:.2}",
                self.offset.x, self.offset.y, self.offset.opacity
            )?;
        }
        Ok(())
    }
}

pub struct ReaderSession<S: ContentSource> {
    content: S,
    controller: ChapterController,
    interpreter: GestureInterpreter,
    started: Instant,
}

impl<S: ContentSource> ReaderSession<S> {
    pub fn new(content: S, controller: ChapterController, gesture: GestureConfig) -> Self {
        Self {
            content,
            controller,
            interpreter: GestureInterpreter::new(gesture),
            started: Instant::now(),
        }
    }

    pub fn controller(&self) -> &ChapterController {
        &self.controller
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn frame(&self) -> Frame {
        let view = self.controller.view();
        let position = self.controller.position();
        Frame {
            chapter_id: position.chapter_id,
            page_index: position.page_index,
            total_pages: position.total_pages,
            mode: view.mode,
            title: view.title.to_string(),
            fell_back: view.fell_back,
            offset: self.interpreter.offset(),
        }
    }

    /// Run inputs until they run out or the reader leaves the chapter.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<Option<Exit>>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut paused_until: Option<Instant> = None;

        loop {
            let reset_at = self
                .controller
                .mode_deadline()
                .map(|ms| self.started + Duration::from_millis(ms));

            tokio::select! {
                biased;

                _ = sleep_until(reset_at.unwrap_or_else(Instant::now)), if reset_at.is_some() => {
                    if self.controller.expire_mode(self.now_ms()) {
                        writeln!(out, "timer: {}", self.frame())?;
                    }
                }
                _ = sleep_until(paused_until.unwrap_or_else(Instant::now)), if paused_until.is_some() => {
                    paused_until = None;
                }
                line = lines.next_line(), if paused_until.is_none() => {
                    let Some(line) = line.context("failed to read input")? else {
                        break;
                    };
                    let Some(input) = parse_line(&line)? else {
                        continue;
                    };
                    if let Input::Wait(ms) = input {
                        paused_until = Some(Instant::now() + Duration::from_millis(ms));
                        continue;
                    }
                    let label = line.trim().to_string();
                    self.handle(input, &label, out)?;
                    if let Some(exit) = self.controller.exited() {
                        return Ok(Some(exit.clone()));
                    }
                }
            }
        }
        Ok(self.controller.exited().cloned())
    }

    fn handle<W: Write>(&mut self, input: Input, label: &str, out: &mut W) -> Result<()> {
        match input {
            Input::Button(command) => self.navigate(&[command], label, out),
            Input::Close => {
                let exit = self.controller.close();
                writeln!(out, "{label}: {}", describe_exit(&exit))?;
                Ok(())
            }
            Input::Swipe { dx, dy } => {
                self.interpreter.feed(GestureSample::started());
                self.interpreter.feed(GestureSample::updated(dx, dy));
                self.feed(GestureSample::ended(dx, dy), label, out)
            }
            Input::Drag(sample) => self.feed(sample, label, out),
            Input::Wait(_) => Ok(()),
        }
    }

    fn feed<W: Write>(&mut self, sample: GestureSample, label: &str, out: &mut W) -> Result<()> {
        match self.interpreter.feed(sample) {
            GestureStep::Ignored => {
                writeln!(out, "{label}: ignored")?;
                Ok(())
            }
            GestureStep::Moved(_) => {
                writeln!(out, "{label}: {}", self.frame())?;
                Ok(())
            }
            GestureStep::Finished(commands) => self.navigate(&commands, label, out),
        }
    }

    fn navigate<W: Write>(
        &mut self,
        commands: &[NavigationCommand],
        label: &str,
        out: &mut W,
    ) -> Result<()> {
        let now = self.now_ms();
        match self.controller.apply_all(&self.content, commands, now) {
            Ok(transitions) => match transitions.last() {
                Some(Transition::Exited(exit)) => {
                    writeln!(out, "{label}: {}", describe_exit(exit))?;
                }
                _ => writeln!(out, "{label}: {}", self.frame())?,
            },
            Err(e) => {
                tracing::warn!("navigation failed: {e}");
                writeln!(out, "{label}: error: {e}")?;
            }
        }
        Ok(())
    }
}

fn describe_exit(exit: &Exit) -> String {
    match exit {
        Exit::LessonOverview { lesson_id } => format!("exit to lesson {lesson_id}"),
        Exit::Back => "exit back".to_string(),
    }
}
