//! Pool ledger: entries and fees collected in the current round.
//!
//! The ledger does not know about draw state. Gating entries on
//! [`DrawState`](crate::types::DrawState) is the raffle's job.

use crate::errors::LedgerError;
use crate::types::{Address, Amount, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLedger {
    #[serde(with = "crate::types::amount_serde")]
    entrance_fee: Amount,
    participants: Vec<Address>,
    #[serde(with = "crate::types::amount_serde")]
    balance: Amount,
    round_start: Timestamp,
}

impl PoolLedger {
    pub fn new(entrance_fee: Amount, round_start: Timestamp) -> Self {
        Self {
            entrance_fee,
            participants: Vec::new(),
            balance: 0,
            round_start,
        }
    }

    /// Record an entry. Overpayment is kept in the pool, not refunded.
    ///
    /// Returns the new participant count.
    pub fn enter(&mut self, player: Address, amount: Amount) -> Result<usize, LedgerError> {
        self.check_fee(amount)?;
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow {
                balance: self.balance,
                amount,
            })?;
        self.participants.push(player);
        self.balance = balance;
        Ok(self.participants.len())
    }

    pub fn check_fee(&self, amount: Amount) -> Result<(), LedgerError> {
        if amount < self.entrance_fee {
            return Err(LedgerError::InsufficientFee {
                required: self.entrance_fee,
                provided: amount,
            });
        }
        Ok(())
    }

    /// Start a new round at `now`
    pub fn reset(&mut self, now: Timestamp) {
        self.participants.clear();
        self.balance = 0;
        self.round_start = now;
    }

    pub fn entrance_fee(&self) -> Amount {
        self.entrance_fee
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant(&self, index: usize) -> Result<Address, LedgerError> {
        self.participants
            .get(index)
            .copied()
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                len: self.participants.len(),
            })
    }

    pub fn participants(&self) -> &[Address] {
        &self.participants
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn round_start(&self) -> Timestamp {
        self.round_start
    }
}
