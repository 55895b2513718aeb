//! Raffle Keeper - Autonomous Verifiable Prize Draw
//!
//! Participants pay a fixed fee into a pool. Once the round interval has
//! elapsed, a keeper starts a draw, a randomness oracle delivers a word
//! asynchronously, and the word selects a winner who receives the whole pool.
//!
//! The core (`raffle`, `ledger`, `eligibility`, `randomness`, `payout`) is
//! synchronous and never talks to the outside world directly: the oracle and
//! the funds custody are passed in as [`RandomnessOracle`] and [`Treasury`].
//! `vrf` and `service` provide a local schnorrkel-backed oracle and a tokio
//! runtime that drives rounds without manual intervention.

pub mod clock;
pub mod config;
pub mod eligibility;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod payout;
pub mod raffle;
pub mod randomness;
pub mod service;
pub mod types;
pub mod vrf;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, RaffleConfig};
pub use eligibility::UpkeepCheck;
pub use errors::{RaffleError, RaffleResult};
pub use events::RaffleEvent;
pub use payout::{Treasury, Wallets};
pub use raffle::{Raffle, RaffleSnapshot};
pub use randomness::{RandomWord, RandomnessOracle, RandomnessRequest};
pub use service::RaffleService;
pub use types::{Address, Amount, DrawState, PayoutStatus, RequestId, Timestamp, WinnerRecord};
pub use vrf::{VrfCoordinator, VrfFulfillment};
