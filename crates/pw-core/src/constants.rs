/// Horizontal travel past which vertical card movement is frozen (logical units)
pub const VERTICAL_LOCK: f32 = 50.0;

/// Horizontal travel required for a page swipe
pub const HORIZONTAL_THRESHOLD: f32 = 100.0;

/// Downward travel required for a reading-mode swipe
pub const VERTICAL_THRESHOLD: f32 = 100.0;

/// Minimum sideways travel for a downward swipe to count as diagonal
pub const DIAGONAL_MINIMUM: f32 = 50.0;

/// Card width used to scale the fade-out while dragging
pub const CARD_WIDTH: f32 = 390.0;

/// Opacity the card fades to at half a card width of travel
pub const MIN_CARD_OPACITY: f32 = 0.5;

/// Reading modes fall back to Normal after this long without navigation
pub const MODE_RESET_MS: u64 = 300;

/// Realtime events held while the initial fetch is in flight.
/// Oldest events are dropped past this bound.
pub const PENDING_EVENT_LIMIT: usize = 1024;

/// Deletes remembered so late upserts cannot resurrect the row.
/// The oldest tombstone is forgotten past this bound.
pub const TOMBSTONE_LIMIT: usize = 1024;
