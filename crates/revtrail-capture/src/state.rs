//! Lifecycle states of an audited save.

use strum::{Display, EnumString};

/// Where a coordinator is within one unit of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// No unit in progress.
    #[default]
    Idle,
    /// Pending mutations are being captured and mapped.
    Capturing,
    /// Target records are populated; nothing has been committed.
    Mapped,
    /// The started event was handed to the sink.
    EarlyEmitted,
    /// The underlying commit is running.
    Committing,
    /// The completed event is being emitted.
    Finalizing,
    /// The unit is over.
    Closed,
    /// The unit failed; its event is still emitted.
    Faulted,
}

impl LifecycleState {
    /// Whether moving to `next` is allowed.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Idle, Capturing)
                | (Idle, Committing)
                | (Capturing, Mapped)
                | (Capturing, Committing)
                | (Capturing, Faulted)
                | (Mapped, EarlyEmitted)
                | (Mapped, Committing)
                | (Mapped, Faulted)
                | (EarlyEmitted, Committing)
                | (EarlyEmitted, Faulted)
                | (Committing, Finalizing)
                | (Committing, Closed)
                | (Committing, Faulted)
                | (Finalizing, Closed)
                | (Finalizing, Faulted)
                | (Faulted, Closed)
                | (Closed, Idle)
        )
    }

    /// Whether the unit has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the underlying commit may already have run.
    pub fn is_past_commit(&self) -> bool {
        matches!(self, Self::Committing | Self::Finalizing | Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_happy_path_single_shot() {
        use LifecycleState::*;
        let path = [Idle, Capturing, Mapped, Committing, Finalizing, Closed, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_happy_path_early_emit() {
        use LifecycleState::*;
        let path = [Idle, Capturing, Mapped, EarlyEmitted, Committing, Finalizing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[test]
    fn test_faulted_reachability() {
        use LifecycleState::*;
        for from in [Capturing, Committing, Finalizing] {
            assert!(from.can_transition_to(Faulted));
        }
        assert!(!Idle.can_transition_to(Faulted));
        assert!(!Closed.can_transition_to(Faulted));
        assert!(Faulted.can_transition_to(Closed));
        assert!(!Faulted.can_transition_to(Committing));
    }

    #[test]
    fn test_no_commit_after_close() {
        assert!(!LifecycleState::Closed.can_transition_to(LifecycleState::Committing));
        assert!(!LifecycleState::Finalizing.can_transition_to(LifecycleState::Committing));
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(LifecycleState::EarlyEmitted.to_string(), "early_emitted");
        assert_eq!(
            LifecycleState::from_str("finalizing").unwrap(),
            LifecycleState::Finalizing
        );
        assert!(LifecycleState::Closed.is_terminal());
        assert!(LifecycleState::Committing.is_past_commit());
        assert!(!LifecycleState::EarlyEmitted.is_past_commit());
    }
}
