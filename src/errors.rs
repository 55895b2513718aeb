//! Error types for the raffle
//!
//! Three classes of failure:
//! - rejected operations: caller error, nothing changed
//! - invariant violations: unreachable if the rejections above hold
//! - transfer failures: bookkeeping already committed, operator must step in

use crate::types::{Address, Amount, DrawState, RequestId};

/// Root error type for all raffle operations
#[derive(Debug, thiserror::Error)]
pub enum RaffleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Draw error: {0}")]
    Draw(#[from] DrawError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Player-side funds movement failed (e.g. wallet cannot cover the fee)
    #[error("Funds error: {0}")]
    Funds(#[from] TransferError),

    /// Payout to the winner failed after the round was already reset.
    #[error("Transfer of {amount} to winner {winner} failed: {source}")]
    TransferFailed {
        winner: Address,
        amount: Amount,
        #[source]
        source: TransferError,
    },
}

impl RaffleError {
    /// Fatal conditions need an operator; everything else is a plain rejection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RaffleError::TransferFailed { .. } | RaffleError::Draw(DrawError::InvariantViolation(_))
        )
    }
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Unknown network preset: {0}")]
    UnknownNetwork(String),
}

/// Pool ledger errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient fee: required {required}, provided {provided}")]
    InsufficientFee { required: Amount, provided: Amount },

    #[error("Participant index {index} out of range (participants: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Pool balance {balance} cannot accept {amount} more")]
    BalanceOverflow { balance: Amount, amount: Amount },
}

/// Draw state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrawError {
    #[error("Raffle is not open (state: {0})")]
    NotOpen(DrawState),

    #[error(
        "Upkeep not needed (balance: {balance}, participants: {participants}, state: {state}, interval elapsed: {interval_elapsed})"
    )]
    UpkeepNotNeeded {
        balance: Amount,
        participants: usize,
        state: DrawState,
        interval_elapsed: bool,
    },

    #[error("Caller {caller} is not the designated oracle")]
    Unauthorized { caller: Address },

    #[error("Unknown randomness request: {0}")]
    UnknownRequest(RequestId),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Randomness oracle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Nonexistent request: {0}")]
    NonexistentRequest(RequestId),

    #[error("Randomness request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid proof: {0}")]
    InvalidProof(String),
}

/// Fund transfer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Recipient {0} rejected the transfer")]
    Rejected(Address),

    #[error("Insufficient custody balance: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("Crediting {amount} to {account} would overflow its balance")]
    BalanceOverflow { account: Address, amount: Amount },

    #[error("Custody cannot hold {amount} more")]
    CustodyOverflow { amount: Amount },
}

/// Convenience type alias for Results
pub type RaffleResult<T> = Result<T, RaffleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let error: RaffleError = LedgerError::InsufficientFee {
            required: 100,
            provided: 99,
        }
        .into();

        assert!(error.to_string().contains("Ledger error"));
        assert!(error.to_string().contains("required 100"));
        assert!(error.to_string().contains("provided 99"));
    }

    #[test]
    fn test_error_conversion() {
        let error: RaffleError = DrawError::UnknownRequest(RequestId(7)).into();
        match error {
            RaffleError::Draw(DrawError::UnknownRequest(id)) => assert_eq!(id, RequestId(7)),
            _ => panic!("Expected draw error"),
        }
    }

    #[test]
    fn test_fatal_classification() {
        let rejected: RaffleError = DrawError::Unauthorized {
            caller: Address::repeat_byte(9),
        }
        .into();
        assert!(!rejected.is_fatal());

        let broken: RaffleError = DrawError::InvariantViolation("no participants".into()).into();
        assert!(broken.is_fatal());

        let transfer = RaffleError::TransferFailed {
            winner: Address::repeat_byte(1),
            amount: 10,
            source: TransferError::Rejected(Address::repeat_byte(1)),
        };
        assert!(transfer.is_fatal());
        assert!(transfer.source().is_some());
    }
}
