use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Current value of something plus a feed of its subsequent updates.
///
/// eg/ the current state snapshot handed to a UI thread alongside the receiver of every later
/// state update.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct SnapUpdates<Snapshot, Updates> {
    pub snapshot: Snapshot,
    pub updates: Updates,
}
