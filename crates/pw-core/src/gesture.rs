//! Swipe interpretation for the content card.
//!
//! A single drag interaction runs from `Started` to `Ended`. While it is in
//! flight the interpreter reports where the card should be drawn; when it
//! ends it classifies the drag into navigation commands. A diagonal drag can
//! legitimately produce both a page command and a reading-mode command.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::NavigationCommand;
use crate::constants::{
    CARD_WIDTH, DIAGONAL_MINIMUM, HORIZONTAL_THRESHOLD, MIN_CARD_OPACITY, VERTICAL_LOCK,
    VERTICAL_THRESHOLD,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GesturePhase {
    Started,
    Updated,
    Ended,
}

/// One input frame. `dx`/`dy` are the translation since the drag started,
/// positive `dy` pointing down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GestureSample {
    pub dx: f32,
    pub dy: f32,
    pub phase: GesturePhase,
}

impl GestureSample {
    pub fn started() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            phase: GesturePhase::Started,
        }
    }

    pub fn updated(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            phase: GesturePhase::Updated,
        }
    }

    pub fn ended(dx: f32, dy: f32) -> Self {
        Self {
            dx,
            dy,
            phase: GesturePhase::Ended,
        }
    }
}

/// Swipe thresholds, in logical units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub vertical_lock: f32,
    pub horizontal: f32,
    pub vertical: f32,
    pub diagonal_min: f32,
    pub card_width: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            vertical_lock: VERTICAL_LOCK,
            horizontal: HORIZONTAL_THRESHOLD,
            vertical: VERTICAL_THRESHOLD,
            diagonal_min: DIAGONAL_MINIMUM,
            card_width: CARD_WIDTH,
        }
    }
}

/// Where the renderer should draw the card during a drag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CardOffset {
    pub x: f32,
    pub y: f32,
    pub opacity: f32,
}

impl CardOffset {
    pub const REST: CardOffset = CardOffset {
        x: 0.0,
        y: 0.0,
        opacity: 1.0,
    };
}

impl Default for CardOffset {
    fn default() -> Self {
        Self::REST
    }
}

/// Result of feeding one sample.
#[derive(Clone, Debug, PartialEq)]
pub enum GestureStep {
    /// Malformed sample (no interaction in flight); dropped.
    Ignored,
    /// Interaction in progress, card moved.
    Moved(CardOffset),
    /// Interaction finished. Never empty: a short drag yields `[Cancel]`.
    Finished(Vec<NavigationCommand>),
}

#[derive(Debug, Default)]
struct Tracking {
    offset: CardOffset,
}

pub struct GestureInterpreter {
    config: GestureConfig,
    tracking: Option<Tracking>,
}

impl GestureInterpreter {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            tracking: None,
        }
    }

    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }

    /// Current card offset; at rest when no drag is in flight.
    pub fn offset(&self) -> CardOffset {
        self.tracking
            .as_ref()
            .map(|t| t.offset)
            .unwrap_or(CardOffset::REST)
    }

    pub fn feed(&mut self, sample: GestureSample) -> GestureStep {
        match sample.phase {
            GesturePhase::Started => {
                if self.tracking.is_some() {
                    debug!("gesture restarted before previous one ended");
                }
                self.tracking = Some(Tracking::default());
                GestureStep::Moved(CardOffset::REST)
            }
            GesturePhase::Updated => {
                let config = self.config;
                let Some(tracking) = self.tracking.as_mut() else {
                    debug!(dx = sample.dx, dy = sample.dy, "dropping update without start");
                    return GestureStep::Ignored;
                };
                tracking.offset = track(&config, tracking.offset, sample.dx, sample.dy);
                GestureStep::Moved(tracking.offset)
            }
            GesturePhase::Ended => {
                if self.tracking.take().is_none() {
                    debug!(dx = sample.dx, dy = sample.dy, "dropping end without start");
                    return GestureStep::Ignored;
                }
                let commands = classify(&self.config, sample.dx, sample.dy);
                debug!(dx = sample.dx, dy = sample.dy, ?commands, "gesture classified");
                GestureStep::Finished(commands)
            }
        }
    }
}

impl Default for GestureInterpreter {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}

/// Card offset for a translation. Past the lock threshold the card stops
/// following vertical movement and starts to fade.
fn track(config: &GestureConfig, prev: CardOffset, dx: f32, dy: f32) -> CardOffset {
    let travel = dx.abs();
    let y = if travel < config.vertical_lock { dy } else { prev.y };
    let opacity = if travel > config.vertical_lock {
        fade(travel, config.card_width / 2.0)
    } else {
        prev.opacity
    };
    CardOffset { x: dx, y, opacity }
}

/// Linear 1.0 → MIN_CARD_OPACITY over [0, span], clamped.
fn fade(travel: f32, span: f32) -> f32 {
    if span <= 0.0 {
        return MIN_CARD_OPACITY;
    }
    let t = (travel / span).clamp(0.0, 1.0);
    1.0 - t * (1.0 - MIN_CARD_OPACITY)
}

/// Classify a finished drag. The page command always comes first; a mode
/// command may follow it.
pub fn classify(config: &GestureConfig, dx: f32, dy: f32) -> Vec<NavigationCommand> {
    let mut commands = Vec::with_capacity(2);

    if dx <= -config.horizontal {
        commands.push(NavigationCommand::Next);
    } else if dx >= config.horizontal {
        commands.push(NavigationCommand::Previous);
    } else {
        commands.push(NavigationCommand::Cancel);
    }

    if dy >= config.vertical {
        if dx <= -config.diagonal_min {
            commands.push(NavigationCommand::EnterFastMode);
        } else if dx >= config.diagonal_min {
            commands.push(NavigationCommand::EnterSlowMode);
        }
    }

    commands
}
