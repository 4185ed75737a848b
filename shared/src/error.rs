//! Error kinds reported to clients in `Exception` packets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a command was refused. None of them leave any trace on the
/// game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ActionNotAllowed {
    #[error("player does not exist")]
    PlayerDoesNotExist,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("action space is already occupied")]
    SpaceOccupied,
    #[error("family member value is too low")]
    InsufficientValue,
    #[error("not enough resources")]
    InsufficientResources,
    #[error("leader card not available")]
    LeaderCardNotAvailable,
    #[error("personal bonus tile not available")]
    PersonalBonusTileNotAvailable,
    #[error("action space is disabled")]
    SpaceDisabled,
    #[error("family member already placed")]
    FamilyMemberNotAvailable,
    #[error("a family member was already placed this turn")]
    AlreadyPlacedThisTurn,
    #[error("command not allowed in the current game phase")]
    WrongPhase,
    #[error("invalid council privilege choice")]
    InvalidPrivilegeChoice,
    #[error("requirements not met")]
    RequirementsNotMet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum GameError {
    #[error("action not allowed: {0}")]
    ActionNotAllowed(#[from] ActionNotAllowed),
    #[error("room is not joinable")]
    RoomNotJoinable,
    #[error("no game can be joined")]
    GameNotJoinable,
    #[error("username '{0}' is already taken")]
    LoginConflict(String),
    #[error("login required")]
    NotLoggedIn,
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// Corrupted room state. Aborts the owning room.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl GameError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, GameError::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_converts_into_game_error() {
        let error: GameError = ActionNotAllowed::SpaceOccupied.into();
        assert_eq!(
            error,
            GameError::ActionNotAllowed(ActionNotAllowed::SpaceOccupied)
        );
        assert_eq!(
            error.to_string(),
            "action not allowed: action space is already occupied"
        );
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let error = GameError::InvariantViolation("floor without tower".to_string());
        assert!(error.is_fatal());
        assert!(!GameError::LoginConflict("bob".to_string()).is_fatal());
    }
}
