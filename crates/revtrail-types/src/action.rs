//! Change actions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of mutation a change entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString)]
pub enum ChangeAction {
    /// A new record was added.
    Insert,
    /// An existing record was modified.
    Update,
    /// An existing record was removed.
    Delete,
}

impl ChangeAction {
    /// Whether entries with this action carry a column-level diff.
    pub fn tracks_changes(&self) -> bool {
        matches!(self, Self::Update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_display_and_parse() {
        assert_eq!(ChangeAction::Update.to_string(), "Update");
        assert_eq!(ChangeAction::from_str("Delete").unwrap(), ChangeAction::Delete);
        assert!(ChangeAction::from_str("Upsert").is_err());
    }

    #[test]
    fn test_only_updates_track_changes() {
        assert!(ChangeAction::Update.tracks_changes());
        assert!(!ChangeAction::Insert.tracks_changes());
        assert!(!ChangeAction::Delete.tracks_changes());
    }
}
