//! Payout executor
//!
//! Bookkeeping is committed before the external transfer runs. A recipient
//! that calls back into the raffle mid-transfer sees an already reset, open
//! round and nothing left to pay out.

use crate::errors::{RaffleError, RaffleResult, TransferError};
use crate::events::RaffleEvent;
use crate::raffle::Raffle;
use crate::types::{Address, Amount, DrawState, PayoutStatus, RequestId, WinnerRecord};
use std::collections::{HashMap, HashSet};
use tracing::{error, info};

/// Moves funds out of the raffle's custody.
pub trait Treasury {
    /// Pay `amount` to `to`.
    ///
    /// `reentry` is the raffle itself: the recipient's code may call back
    /// into it before the transfer returns.
    fn transfer(&mut self, reentry: &mut Raffle, to: &Address, amount: Amount) -> Result<(), TransferError>;
}

impl Raffle {
    /// Reset the round, record the winner and reopen, then transfer.
    pub(crate) fn execute_payout(
        &mut self,
        treasury: &mut dyn Treasury,
        request_id: RequestId,
        winner: Address,
        amount: Amount,
    ) -> RaffleResult<WinnerRecord> {
        let now = self.now();
        let record = WinnerRecord {
            winner,
            amount,
            request_id,
            timestamp: now,
            status: PayoutStatus::Paid,
        };

        // Effects
        self.ledger.reset(now);
        self.recent_winner = Some(record.clone());
        self.state = DrawState::Open;

        info!(%winner, amount = %amount, %request_id, "Winner picked");
        self.emit(RaffleEvent::WinnerPicked {
            winner,
            amount,
            request_id,
        });

        // Interaction
        if let Err(source) = treasury.transfer(self, &winner, amount) {
            error!(%winner, amount = %amount, %request_id, error = %source, "Payout failed, raffle halted");
            // Pending request is already gone, so nothing can leave this state.
            self.state = DrawState::Calculating;
            if let Some(recent) = self.recent_winner.as_mut().filter(|r| r.request_id == request_id) {
                recent.status = PayoutStatus::RequiresManualIntervention {
                    reason: source.to_string(),
                };
            }
            return Err(RaffleError::TransferFailed {
                winner,
                amount,
                source,
            });
        }

        Ok(record)
    }
}

/// In-memory account balances plus the raffle's custody account
#[derive(Debug, Default, Clone)]
pub struct Wallets {
    balances: HashMap<Address, Amount>,
    custody: Amount,
    rejecting: HashSet<Address>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account` from outside the system
    pub fn fund(&mut self, account: Address, amount: Amount) -> Result<(), TransferError> {
        let credited = self.credited(&account, amount)?;
        self.balances.insert(account, credited);
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn custody(&self) -> Amount {
        self.custody
    }

    /// Move `amount` from `from` into custody
    pub fn collect(&mut self, from: &Address, amount: Amount) -> Result<(), TransferError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(TransferError::InsufficientFunds {
                needed: amount,
                available,
            });
        }
        let custody = self
            .custody
            .checked_add(amount)
            .ok_or(TransferError::CustodyOverflow { amount })?;
        self.balances.insert(*from, available - amount);
        self.custody = custody;
        Ok(())
    }

    /// Undo a [`collect`](Self::collect). Unlike a payout, the recipient cannot refuse.
    pub fn refund(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        self.move_from_custody(to, amount)
    }

    /// Make `account` refuse incoming payouts
    pub fn reject_payments_to(&mut self, account: Address) {
        self.rejecting.insert(account);
    }

    pub fn accept_payments_to(&mut self, account: &Address) {
        self.rejecting.remove(account);
    }

    fn release(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        if self.rejecting.contains(to) {
            return Err(TransferError::Rejected(*to));
        }
        self.move_from_custody(to, amount)
    }

    /// Both sides are checked before either balance changes
    fn move_from_custody(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        if self.custody < amount {
            return Err(TransferError::InsufficientFunds {
                needed: amount,
                available: self.custody,
            });
        }
        let credited = self.credited(to, amount)?;
        self.custody -= amount;
        self.balances.insert(*to, credited);
        Ok(())
    }

    fn credited(&self, to: &Address, amount: Amount) -> Result<Amount, TransferError> {
        self.balance_of(to)
            .checked_add(amount)
            .ok_or(TransferError::BalanceOverflow { account: *to, amount })
    }
}

impl Treasury for Wallets {
    fn transfer(&mut self, _reentry: &mut Raffle, to: &Address, amount: Amount) -> Result<(), TransferError> {
        self.release(to, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_moves_into_custody() {
        let mut wallets = Wallets::new();
        let player = Address::repeat_byte(1);
        wallets.fund(player, 500).unwrap();

        wallets.collect(&player, 200).unwrap();
        assert_eq!(wallets.balance_of(&player), 300);
        assert_eq!(wallets.custody(), 200);
    }

    #[test]
    fn test_collect_insufficient_balance() {
        let mut wallets = Wallets::new();
        let player = Address::repeat_byte(1);
        wallets.fund(player, 50).unwrap();

        assert_eq!(
            wallets.collect(&player, 100),
            Err(TransferError::InsufficientFunds {
                needed: 100,
                available: 50
            })
        );
        assert_eq!(wallets.custody(), 0);
    }

    #[test]
    fn test_rejecting_account_refuses_release() {
        let mut wallets = Wallets::new();
        let player = Address::repeat_byte(1);
        wallets.fund(player, 100).unwrap();
        wallets.collect(&player, 100).unwrap();

        wallets.reject_payments_to(player);
        assert_eq!(wallets.release(&player, 100), Err(TransferError::Rejected(player)));
        assert_eq!(wallets.custody(), 100);

        wallets.accept_payments_to(&player);
        wallets.release(&player, 60).unwrap();
        assert_eq!(wallets.balance_of(&player), 60);
    }

    #[test]
    fn test_refund_ignores_rejection() {
        let mut wallets = Wallets::new();
        let player = Address::repeat_byte(1);
        wallets.fund(player, 100).unwrap();
        wallets.collect(&player, 100).unwrap();
        wallets.reject_payments_to(player);

        wallets.refund(&player, 100).unwrap();
        assert_eq!(wallets.balance_of(&player), 100);
        assert_eq!(wallets.custody(), 0);
    }

    #[test]
    fn test_fund_past_balance_limit_rejected() {
        let mut wallets = Wallets::new();
        let player = Address::repeat_byte(1);
        wallets.fund(player, Amount::MAX).unwrap();

        assert_eq!(
            wallets.fund(player, 1),
            Err(TransferError::BalanceOverflow {
                account: player,
                amount: 1
            })
        );
        assert_eq!(wallets.balance_of(&player), Amount::MAX);
    }

    #[test]
    fn test_collect_past_custody_limit_rejected() {
        let mut wallets = Wallets::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        wallets.fund(a, Amount::MAX).unwrap();
        wallets.fund(b, 5).unwrap();
        wallets.collect(&a, Amount::MAX).unwrap();

        assert_eq!(wallets.collect(&b, 5), Err(TransferError::CustodyOverflow { amount: 5 }));
        assert_eq!(wallets.balance_of(&b), 5);
        assert_eq!(wallets.custody(), Amount::MAX);
    }

    #[test]
    fn test_release_to_full_account_keeps_custody() {
        let mut wallets = Wallets::new();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        wallets.fund(a, 10).unwrap();
        wallets.collect(&a, 10).unwrap();
        wallets.fund(b, Amount::MAX).unwrap();

        assert!(matches!(
            wallets.release(&b, 10),
            Err(TransferError::BalanceOverflow { .. })
        ));
        assert_eq!(wallets.custody(), 10);
        assert_eq!(wallets.balance_of(&b), Amount::MAX);
    }
}
