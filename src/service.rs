//! Keeper service
//!
//! Hosts a raffle, the local VRF coordinator and player wallets behind one
//! async mutex, so every operation is atomic with respect to the others.
//! Two background loops drive the raffle without manual intervention:
//! - keeper: polls `check_upkeep` and starts a draw when it holds
//! - fulfiller: delivers randomness for requests older than the configured delay

use crate::clock::Clock;
use crate::config::RaffleConfig;
use crate::eligibility::UpkeepCheck;
use crate::errors::{DrawError, RaffleError, RaffleResult};
use crate::events::RaffleEvent;
use crate::payout::Wallets;
use crate::raffle::{Raffle, RaffleSnapshot};
use crate::types::{Address, Amount, RequestId, WinnerRecord};
use crate::vrf::{VrfCoordinator, VrfFulfillment};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything the serialized section owns.
///
/// `coordinator` shares its request queue with the oracle installed in `raffle`.
pub struct Runtime {
    pub raffle: Raffle,
    pub coordinator: VrfCoordinator,
    pub wallets: Wallets,
}

#[derive(Clone)]
pub struct RaffleService {
    config: RaffleConfig,
    runtime: Arc<Mutex<Runtime>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RaffleService {
    pub fn new(config: RaffleConfig, clock: Arc<dyn Clock>) -> RaffleResult<Self> {
        let coordinator = VrfCoordinator::new_random(config.oracle.coordinator);
        let raffle = Raffle::new(&config, clock, Box::new(coordinator.clone()))?;
        info!(public_key = %coordinator.public_key_hex(), "VRF coordinator ready");
        Ok(Self::with_runtime(
            config,
            Runtime {
                raffle,
                coordinator,
                wallets: Wallets::new(),
            },
        ))
    }

    pub fn with_runtime(config: RaffleConfig, runtime: Runtime) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            runtime: Arc::new(Mutex::new(runtime)),
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    /// Credit a player's wallet
    pub async fn fund(&self, player: Address, amount: Amount) -> RaffleResult<()> {
        Ok(self.runtime.lock().await.wallets.fund(player, amount)?)
    }

    pub async fn balance_of(&self, player: &Address) -> Amount {
        self.runtime.lock().await.wallets.balance_of(player)
    }

    /// Pay `amount` from the player's wallet and enter. Refunds on rejection.
    pub async fn enter(&self, player: Address, amount: Amount) -> RaffleResult<usize> {
        let mut guard = self.runtime.lock().await;
        let runtime = &mut *guard;

        runtime.wallets.collect(&player, amount)?;
        match runtime.raffle.enter(player, amount) {
            Ok(count) => Ok(count),
            Err(e) => {
                if let Err(refund_error) = runtime.wallets.refund(&player, amount) {
                    error!(%player, error = %refund_error, "Refund after rejected entry failed");
                }
                Err(e)
            }
        }
    }

    pub async fn check_upkeep(&self) -> UpkeepCheck {
        self.runtime.lock().await.raffle.check_upkeep()
    }

    /// Start a draw if one is due. `Ok(None)` when upkeep is not needed.
    pub async fn perform_upkeep_if_needed(&self) -> RaffleResult<Option<RequestId>> {
        match self.runtime.lock().await.raffle.perform_upkeep() {
            Ok(request_id) => Ok(Some(request_id)),
            Err(RaffleError::Draw(DrawError::UpkeepNotNeeded { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deliver randomness for every request that has waited long enough.
    pub async fn fulfill_ready(&self) -> RaffleResult<Vec<(VrfFulfillment, WinnerRecord)>> {
        let mut guard = self.runtime.lock().await;
        let runtime = &mut *guard;

        let ready = runtime.coordinator.ready_requests(self.config.fulfillment_delay());
        let mut completed = Vec::with_capacity(ready.len());
        for request_id in ready {
            let result = runtime
                .coordinator
                .fulfill(request_id, &mut runtime.raffle, &mut runtime.wallets)?;
            completed.push(result);
        }
        Ok(completed)
    }

    pub async fn snapshot(&self) -> RaffleSnapshot {
        self.runtime.lock().await.raffle.snapshot()
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.runtime.lock().await.raffle.subscribe()
    }

    /// Run `f` with exclusive access to the runtime
    pub async fn with_runtime_mut<R>(&self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let mut guard = self.runtime.lock().await;
        f(&mut *guard)
    }

    /// Poll upkeep on the configured interval until shutdown.
    pub fn spawn_keeper(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.poll_interval());
            info!(poll_interval_ms = service.config.keeper.poll_interval_ms, "Keeper started");

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                match service.perform_upkeep_if_needed().await {
                    Ok(Some(request_id)) => info!(%request_id, "Keeper started a draw"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Keeper upkeep failed"),
                }
            }

            info!("Keeper stopped");
        })
    }

    /// Fulfill pending randomness requests until shutdown or a fatal error.
    pub fn spawn_fulfiller(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.poll_interval());
            info!(
                fulfillment_delay_ms = service.config.keeper.fulfillment_delay_ms,
                "Fulfiller started"
            );

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                match service.fulfill_ready().await {
                    Ok(completed) => {
                        for (fulfillment, record) in completed {
                            debug!(
                                request_id = %fulfillment.request_id,
                                winner = %record.winner,
                                proof = %fulfillment.proof,
                                "Fulfillment delivered"
                            );
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Fatal fulfillment error, operator intervention required");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Fulfillment rejected"),
                }
            }

            info!("Fulfiller stopped");
        })
    }

    /// Signal both background loops to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::{LedgerError, TransferError};
    use crate::types::DrawState;

    const FEE: Amount = 100;

    fn service(interval_secs: u64) -> (RaffleService, ManualClock) {
        let mut config = RaffleConfig::default();
        config.raffle.entrance_fee = FEE;
        config.raffle.interval_secs = interval_secs;
        config.keeper.poll_interval_ms = 10;
        config.keeper.fulfillment_delay_ms = 0;
        let clock = ManualClock::new(1_000);
        let service = RaffleService::new(config, Arc::new(clock.clone())).unwrap();
        (service, clock)
    }

    #[tokio::test]
    async fn test_enter_collects_from_wallet() {
        let (service, _) = service(30);
        let player = Address::repeat_byte(1);
        service.fund(player, 250).await.unwrap();

        assert_eq!(service.enter(player, FEE).await.unwrap(), 1);
        assert_eq!(service.balance_of(&player).await, 150);
        assert_eq!(service.snapshot().await.pool_balance, FEE);
    }

    #[tokio::test]
    async fn test_rejected_entry_is_refunded() {
        let (service, _) = service(30);
        let player = Address::repeat_byte(1);
        service.fund(player, 250).await.unwrap();

        let err = service.enter(player, FEE - 1).await.unwrap_err();
        assert!(matches!(err, RaffleError::Ledger(LedgerError::InsufficientFee { .. })));
        assert_eq!(service.balance_of(&player).await, 250);
    }

    #[tokio::test]
    async fn test_unfunded_entry_fails() {
        let (service, _) = service(30);
        let err = service.enter(Address::repeat_byte(1), FEE).await.unwrap_err();
        assert!(matches!(err, RaffleError::Funds(TransferError::InsufficientFunds { .. })));
        assert_eq!(service.snapshot().await.participants.len(), 0);
    }

    #[tokio::test]
    async fn test_manual_round_through_service() {
        let (service, clock) = service(30);
        let player = Address::repeat_byte(1);
        service.fund(player, FEE).await.unwrap();
        service.enter(player, FEE).await.unwrap();

        assert_eq!(service.perform_upkeep_if_needed().await.unwrap(), None);
        clock.advance(30);
        let request_id = service.perform_upkeep_if_needed().await.unwrap().unwrap();
        assert_eq!(request_id, RequestId(1));
        assert!(
            service
                .with_runtime_mut(|runtime| runtime.coordinator.is_pending(request_id))
                .await
        );

        let completed = service.fulfill_ready().await.unwrap();
        assert_eq!(completed.len(), 1);
        let (fulfillment, record) = &completed[0];
        assert_eq!(record.winner, player);
        assert!(VrfCoordinator::verify_fulfillment(fulfillment).unwrap());
        assert_eq!(service.balance_of(&player).await, FEE);
        assert_eq!(service.snapshot().await.state, DrawState::Open);
    }

    #[tokio::test]
    async fn test_entry_rejected_while_draw_pending() {
        let (service, clock) = service(0);
        let a = Address::repeat_byte(1);
        service.fund(a, FEE * 2).await.unwrap();
        service.enter(a, FEE).await.unwrap();
        clock.advance(1);
        service.perform_upkeep_if_needed().await.unwrap().unwrap();

        let err = service.enter(a, FEE).await.unwrap_err();
        assert!(matches!(err, RaffleError::Draw(DrawError::NotOpen(_))));
        assert_eq!(service.balance_of(&a).await, FEE);
    }
}
