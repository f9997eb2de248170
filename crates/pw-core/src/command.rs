use serde::{Deserialize, Serialize};

/// A discrete request for the chapter page controller.
///
/// Produced by the gesture interpreter (or directly by the footer buttons)
/// and consumed exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationCommand {
    Next,
    Previous,
    EnterFastMode,
    EnterSlowMode,
    Cancel,
}

impl NavigationCommand {
    /// Commands that move the page position (and so cancel a pending mode reset).
    pub fn moves_page(self) -> bool {
        matches!(self, NavigationCommand::Next | NavigationCommand::Previous)
    }

    pub fn is_mode_entry(self) -> bool {
        matches!(
            self,
            NavigationCommand::EnterFastMode | NavigationCommand::EnterSlowMode
        )
    }
}
