//! Local VRF oracle coordinator
//!
//! Stands in for an external oracle network: issues request ids, and when
//! asked to fulfill, signs the request with schnorrkel and delivers the
//! hashed signature to the raffle as the random word. Every fulfillment
//! carries its proof so observers can verify the draw after the fact.

use crate::errors::{OracleError, RaffleResult};
use crate::payout::Treasury;
use crate::raffle::Raffle;
use crate::randomness::{RandomWord, RandomnessOracle, RandomnessRequest};
use crate::types::{Address, RequestId, WinnerRecord};
use schnorrkel::context::SigningContext;
use schnorrkel::{Keypair, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

const VRF_SIGNING_CONTEXT: &[u8] = b"raffle-vrf";

/// Proof bundle for one fulfillment (hex encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfFulfillment {
    pub request_id: RequestId,
    pub random_word: String,
    pub proof: String,
    pub public_key: String,
    pub input_message: String,
}

#[derive(Debug, Clone)]
struct QueuedRequest {
    request: RandomnessRequest,
    received_at: Instant,
}

#[derive(Debug)]
struct RequestQueue {
    next_request_id: u64,
    pending: BTreeMap<RequestId, QueuedRequest>,
}

/// Cloneable handle; clones share the signing key and the request queue.
///
/// One clone is installed in the raffle as its oracle, another is kept by
/// whoever delivers fulfillments.
#[derive(Clone)]
pub struct VrfCoordinator {
    keypair: Arc<Keypair>,
    address: Address,
    queue: Arc<Mutex<RequestQueue>>,
}

impl VrfCoordinator {
    pub fn new(keypair: Keypair, address: Address) -> Self {
        Self {
            keypair: Arc::new(keypair),
            address,
            queue: Arc::new(Mutex::new(RequestQueue {
                next_request_id: 1,
                pending: BTreeMap::new(),
            })),
        }
    }

    /// Coordinator with a fresh random keypair
    pub fn new_random(address: Address) -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng), address)
    }

    /// Identity the raffle must accept fulfillments from
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.queue().pending.contains_key(&request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.queue().pending.len()
    }

    /// Pending ids queued for at least `min_age`, oldest first
    pub fn ready_requests(&self, min_age: std::time::Duration) -> Vec<RequestId> {
        self.queue()
            .pending
            .iter()
            .filter(|(_, queued)| queued.received_at.elapsed() >= min_age)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Produce randomness for `request_id` and deliver it to the raffle.
    ///
    /// The request is consumed whether or not the raffle accepts the word.
    pub fn fulfill(
        &self,
        request_id: RequestId,
        raffle: &mut Raffle,
        treasury: &mut dyn Treasury,
    ) -> RaffleResult<(VrfFulfillment, WinnerRecord)> {
        // Queue lock is released before the raffle runs: a payout may re-enter upkeep.
        let queued = self
            .queue()
            .pending
            .remove(&request_id)
            .ok_or(OracleError::NonexistentRequest(request_id))?;

        let (fulfillment, word) = self.sign(request_id, &queued.request);
        debug!(%request_id, %word, "Delivering randomness");

        let record = raffle.fulfill_random_words(&self.address, request_id, word, treasury)?;
        Ok((fulfillment, record))
    }

    fn queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sign(&self, request_id: RequestId, request: &RandomnessRequest) -> (VrfFulfillment, RandomWord) {
        let input_message = input_message(request_id, request);
        let signature = self
            .keypair
            .sign(SigningContext::new(VRF_SIGNING_CONTEXT).bytes(input_message.as_bytes()));
        let word = word_from_signature(&signature);

        let fulfillment = VrfFulfillment {
            request_id,
            random_word: hex::encode(word.as_bytes()),
            proof: hex::encode(signature.to_bytes()),
            public_key: self.public_key_hex(),
            input_message,
        };
        (fulfillment, word)
    }

    /// Check a fulfillment's proof and that its word derives from it.
    pub fn verify_fulfillment(fulfillment: &VrfFulfillment) -> Result<bool, OracleError> {
        let word = hex::decode(&fulfillment.random_word)
            .map_err(|e| OracleError::InvalidProof(format!("Invalid random word hex: {}", e)))?;
        let proof = hex::decode(&fulfillment.proof)
            .map_err(|e| OracleError::InvalidProof(format!("Invalid proof hex: {}", e)))?;
        let public_key = hex::decode(&fulfillment.public_key)
            .map_err(|e| OracleError::InvalidProof(format!("Invalid public key hex: {}", e)))?;

        let public_key = PublicKey::from_bytes(&public_key)
            .map_err(|e| OracleError::InvalidProof(format!("Invalid public key: {:?}", e)))?;
        let signature = Signature::from_bytes(&proof)
            .map_err(|e| OracleError::InvalidProof(format!("Invalid signature: {:?}", e)))?;

        let transcript = SigningContext::new(VRF_SIGNING_CONTEXT).bytes(fulfillment.input_message.as_bytes());
        if public_key.verify(transcript, &signature).is_err() {
            return Ok(false);
        }

        Ok(word_from_signature(&signature).as_bytes().as_slice() == word.as_slice())
    }
}

impl RandomnessOracle for VrfCoordinator {
    fn request_randomness(&mut self, request: &RandomnessRequest) -> Result<RequestId, OracleError> {
        if request.num_words == 0 {
            return Err(OracleError::RequestFailed("num_words must be > 0".to_string()));
        }

        let mut queue = self.queue();
        let request_id = RequestId(queue.next_request_id);
        queue.next_request_id += 1;
        queue.pending.insert(
            request_id,
            QueuedRequest {
                request: request.clone(),
                received_at: Instant::now(),
            },
        );
        debug!(%request_id, subscription_id = request.subscription_id, "Randomness requested");
        Ok(request_id)
    }
}

fn input_message(request_id: RequestId, request: &RandomnessRequest) -> String {
    format!("{}:{}:{}", request_id, request.key_hash, request.subscription_id)
}

fn word_from_signature(signature: &Signature) -> RandomWord {
    let digest: [u8; 32] = Sha256::digest(signature.to_bytes()).into();
    RandomWord::from_bytes(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;

    fn request() -> RandomnessRequest {
        RandomnessRequest::from(&OracleConfig::default())
    }

    #[test]
    fn test_request_ids_start_at_one() {
        let mut coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        assert_eq!(coordinator.request_randomness(&request()).unwrap(), RequestId(1));
        assert_eq!(coordinator.request_randomness(&request()).unwrap(), RequestId(2));
        assert_eq!(coordinator.pending_count(), 2);
        assert!(coordinator.is_pending(RequestId(1)));
        assert!(!coordinator.is_pending(RequestId(0)));
    }

    #[test]
    fn test_clones_share_request_queue() {
        let coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        let mut installed = coordinator.clone();
        let id = installed.request_randomness(&request()).unwrap();
        assert!(coordinator.is_pending(id));
        assert_eq!(coordinator.ready_requests(std::time::Duration::ZERO), vec![id]);
    }

    #[test]
    fn test_signature_verifies() {
        let coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        let (fulfillment, word) = coordinator.sign(RequestId(1), &request());
        assert_eq!(fulfillment.random_word, hex::encode(word.as_bytes()));
        assert!(VrfCoordinator::verify_fulfillment(&fulfillment).unwrap());
    }

    #[test]
    fn test_repeated_signatures_all_verify() {
        let coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        let (a, _) = coordinator.sign(RequestId(1), &request());
        let (b, _) = coordinator.sign(RequestId(1), &request());
        assert_eq!(a.input_message, b.input_message);
        // schnorrkel signatures are randomized; both still verify
        assert!(VrfCoordinator::verify_fulfillment(&a).unwrap());
        assert!(VrfCoordinator::verify_fulfillment(&b).unwrap());
    }

    #[test]
    fn test_tampered_word_rejected() {
        let coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        let (mut fulfillment, _) = coordinator.sign(RequestId(1), &request());
        fulfillment.random_word = hex::encode([0xff; 32]);
        assert!(!VrfCoordinator::verify_fulfillment(&fulfillment).unwrap());
    }

    #[test]
    fn test_tampered_input_rejected() {
        let coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        let (mut fulfillment, _) = coordinator.sign(RequestId(1), &request());
        fulfillment.input_message = "2:forged:1".to_string();
        assert!(!VrfCoordinator::verify_fulfillment(&fulfillment).unwrap());
    }

    #[test]
    fn test_ready_requests_respects_age() {
        let mut coordinator = VrfCoordinator::new_random(Address::repeat_byte(0xcc));
        coordinator.request_randomness(&request()).unwrap();
        assert_eq!(coordinator.ready_requests(std::time::Duration::ZERO), vec![RequestId(1)]);
        assert!(coordinator
            .ready_requests(std::time::Duration::from_secs(3_600))
            .is_empty());
    }
}
