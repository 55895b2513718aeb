//! Draw state machine
//!
//! ```text
//!   enter ──▶ OPEN ──perform_upkeep──▶ CALCULATING ──fulfill_random_words──▶ OPEN
//! ```
//!
//! Every public operation runs to completion against `&mut self`; callers that
//! share a raffle across tasks must serialize access (see `service`).

use crate::clock::Clock;
use crate::config::RaffleConfig;
use crate::eligibility::{self, UpkeepCheck};
use crate::errors::{DrawError, RaffleResult};
use crate::events::{EventBus, RaffleEvent};
use crate::ledger::PoolLedger;
use crate::payout::Treasury;
use crate::randomness::{self, RandomWord, RandomnessOracle, RandomnessRequest};
use crate::types::{Address, Amount, DrawState, PendingRequest, RequestId, Timestamp, WinnerRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Raffle {
    interval_secs: u64,
    request: RandomnessRequest,
    coordinator: Address,
    pub(crate) ledger: PoolLedger,
    pub(crate) state: DrawState,
    pending: Option<PendingRequest>,
    pub(crate) recent_winner: Option<WinnerRecord>,
    oracle: Box<dyn RandomnessOracle>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

/// Read-only view of the raffle for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleSnapshot {
    pub state: DrawState,
    #[serde(with = "crate::types::amount_serde")]
    pub entrance_fee: Amount,
    pub interval_secs: u64,
    pub participants: Vec<Address>,
    #[serde(with = "crate::types::amount_serde")]
    pub pool_balance: Amount,
    pub round_start: Timestamp,
    pub pending_request: Option<PendingRequest>,
    pub recent_winner: Option<WinnerRecord>,
    /// Stuck after a failed payout; see [`Raffle::is_halted`]
    pub halted: bool,
}

impl Raffle {
    /// Open the first round at the clock's current time.
    ///
    /// `oracle` receives every randomness request for the raffle's lifetime.
    /// Its fulfillments must arrive from `config.oracle.coordinator`.
    pub fn new(config: &RaffleConfig, clock: Arc<dyn Clock>, oracle: Box<dyn RandomnessOracle>) -> RaffleResult<Self> {
        config.validate()?;
        let now = clock.now();

        info!(
            entrance_fee = %config.raffle.entrance_fee,
            interval_secs = config.raffle.interval_secs,
            coordinator = %config.oracle.coordinator,
            "Raffle opened"
        );

        Ok(Self {
            interval_secs: config.raffle.interval_secs,
            request: RandomnessRequest::from(&config.oracle),
            coordinator: config.oracle.coordinator,
            ledger: PoolLedger::new(config.raffle.entrance_fee, now),
            state: DrawState::Open,
            pending: None,
            recent_winner: None,
            oracle,
            clock,
            events: EventBus::new(),
        })
    }

    /// Enter `player` with a payment of `amount`. Returns the new participant count.
    pub fn enter(&mut self, player: Address, amount: Amount) -> RaffleResult<usize> {
        self.ledger.check_fee(amount)?;
        if self.state != DrawState::Open {
            return Err(DrawError::NotOpen(self.state).into());
        }

        let participant_count = self.ledger.enter(player, amount)?;
        debug!(%player, amount = %amount, participant_count, "Entry accepted");
        self.emit(RaffleEvent::EntryAccepted {
            player,
            amount,
            participant_count,
        });
        Ok(participant_count)
    }

    /// Whether a draw may start now, with the reason if not. Never mutates.
    pub fn check_upkeep(&self) -> UpkeepCheck {
        eligibility::evaluate(&self.ledger, self.state, self.interval_secs, self.now())
    }

    /// Start a draw. Anyone may call this; eligibility is the only gate.
    pub fn perform_upkeep(&mut self) -> RaffleResult<RequestId> {
        let check = self.check_upkeep();
        if !check.upkeep_needed {
            debug!(blockers = ?check.blockers(), "Upkeep not needed");
            return Err(DrawError::UpkeepNotNeeded {
                balance: check.balance,
                participants: check.participants,
                state: check.state,
                interval_elapsed: check.interval_elapsed,
            }
            .into());
        }

        let request_id = self.oracle.request_randomness(&self.request)?;
        self.state = DrawState::Calculating;
        self.pending = Some(PendingRequest {
            request_id,
            issued_at: self.now(),
        });

        info!(%request_id, participants = check.participants, pool = %check.balance, "Draw requested");
        self.emit(RaffleEvent::DrawRequested { request_id });
        Ok(request_id)
    }

    /// Oracle callback: consume `word` for `request_id`, pay the winner and reopen.
    pub fn fulfill_random_words(
        &mut self,
        caller: &Address,
        request_id: RequestId,
        word: RandomWord,
        treasury: &mut dyn Treasury,
    ) -> RaffleResult<WinnerRecord> {
        if *caller != self.coordinator {
            warn!(%caller, %request_id, "Fulfillment from unauthorized caller");
            return Err(DrawError::Unauthorized { caller: *caller }.into());
        }

        let pending = match self.pending {
            Some(pending) if pending.request_id == request_id && self.state == DrawState::Calculating => pending,
            _ => {
                warn!(%request_id, expected = ?self.pending.map(|p| p.request_id), "Fulfillment for unknown request");
                return Err(DrawError::UnknownRequest(request_id).into());
            }
        };

        let index = randomness::winner_index(&word, self.ledger.participant_count())?;
        let winner = self.ledger.participant(index)?;
        let amount = self.ledger.balance();
        debug!(%request_id, %word, index, "Randomness consumed");

        self.pending = None;
        self.execute_payout(treasury, pending.request_id, winner, amount)
    }

    pub fn state(&self) -> DrawState {
        self.state
    }

    pub fn entrance_fee(&self) -> Amount {
        self.ledger.entrance_fee()
    }

    pub fn interval(&self) -> u64 {
        self.interval_secs
    }

    pub fn participant_count(&self) -> usize {
        self.ledger.participant_count()
    }

    pub fn participant(&self, index: usize) -> RaffleResult<Address> {
        Ok(self.ledger.participant(index)?)
    }

    pub fn participants(&self) -> &[Address] {
        self.ledger.participants()
    }

    pub fn pool_balance(&self) -> Amount {
        self.ledger.balance()
    }

    /// Time the current round opened
    pub fn last_timestamp(&self) -> Timestamp {
        self.ledger.round_start()
    }

    pub fn recent_winner(&self) -> Option<&WinnerRecord> {
        self.recent_winner.as_ref()
    }

    /// Outstanding randomness request. Present exactly while CALCULATING,
    /// except after a failed payout (see [`is_halted`](Self::is_halted)).
    pub fn pending_request(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// CALCULATING with no request outstanding: a payout failed and nothing
    /// can move the raffle until an operator steps in.
    pub fn is_halted(&self) -> bool {
        self.state == DrawState::Calculating && self.pending.is_none()
    }

    pub fn coordinator(&self) -> Address {
        self.coordinator
    }

    pub fn num_words(&self) -> u32 {
        self.request.num_words
    }

    pub fn request_confirmations(&self) -> u16 {
        self.request.request_confirmations
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RaffleEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> RaffleSnapshot {
        RaffleSnapshot {
            state: self.state,
            entrance_fee: self.entrance_fee(),
            interval_secs: self.interval_secs,
            participants: self.participants().to_vec(),
            pool_balance: self.pool_balance(),
            round_start: self.last_timestamp(),
            pending_request: self.pending,
            recent_winner: self.recent_winner.clone(),
            halted: self.is_halted(),
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn emit(&self, event: RaffleEvent) {
        self.events.publish(event);
    }
}
