//! Draw eligibility ("check upkeep").
//!
//! Side-effect free so the upkeep poller can call it as often as it likes.

use crate::ledger::PoolLedger;
use crate::types::{Amount, DrawState, Timestamp};
use serde::{Deserialize, Serialize};

/// Eligibility verdict with each condition exposed for diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpkeepCheck {
    pub upkeep_needed: bool,
    pub interval_elapsed: bool,
    pub is_open: bool,
    pub has_balance: bool,
    pub has_players: bool,
    #[serde(with = "crate::types::amount_serde")]
    pub balance: Amount,
    pub participants: usize,
    pub state: DrawState,
}

impl UpkeepCheck {
    /// Names of the conditions currently blocking a draw
    pub fn blockers(&self) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if !self.interval_elapsed {
            blockers.push("interval_not_elapsed");
        }
        if !self.is_open {
            blockers.push("not_open");
        }
        if !self.has_balance {
            blockers.push("no_balance");
        }
        if !self.has_players {
            blockers.push("no_players");
        }
        blockers
    }
}

/// Evaluate whether a draw may start at `now`.
pub fn evaluate(ledger: &PoolLedger, state: DrawState, interval_secs: u64, now: Timestamp) -> UpkeepCheck {
    // A clock behind round start counts as "not yet".
    let interval_elapsed = now
        .checked_sub(ledger.round_start())
        .is_some_and(|elapsed| elapsed >= interval_secs);
    let is_open = state == DrawState::Open;
    let has_balance = ledger.balance() > 0;
    let has_players = ledger.participant_count() > 0;

    UpkeepCheck {
        upkeep_needed: interval_elapsed && is_open && has_balance && has_players,
        interval_elapsed,
        is_open,
        has_balance,
        has_players,
        balance: ledger.balance(),
        participants: ledger.participant_count(),
        state,
    }
}

/// Boolean form of [`evaluate`]
pub fn is_draw_eligible(ledger: &PoolLedger, state: DrawState, interval_secs: u64, now: Timestamp) -> bool {
    evaluate(ledger, state, interval_secs, now).upkeep_needed
}
