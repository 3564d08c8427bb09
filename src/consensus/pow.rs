// Proof of Work implementation

use crate::core::{BlockHeader, Hash256};
use std::time::{Duration, Instant};

/// Difficulty target: a hash is valid iff, read as an unsigned big
/// integer, it is at most 2^(256 - difficulty) - 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Leading zero bits required
    pub difficulty: u32,
}

impl Target {
    pub fn from_difficulty(difficulty: u32) -> Self {
        Self { difficulty }
    }

    /// Largest valid hash, big-endian. `None` when difficulty exceeds 256
    /// and no hash can satisfy it.
    pub fn to_hash256(&self) -> Option<Hash256> {
        if self.difficulty > 256 {
            return None;
        }

        let mut target = [0xffu8; 32];
        let full_bytes = (self.difficulty / 8) as usize;
        let rem_bits = self.difficulty % 8;

        for byte in target.iter_mut().take(full_bytes) {
            *byte = 0;
        }
        if full_bytes < 32 {
            target[full_bytes] = 0xff >> rem_bits;
        }

        Some(Hash256::new(target))
    }

    /// Check if a hash meets this target (hash <= target)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        match self.to_hash256() {
            Some(target) => hash <= &target,
            None => false,
        }
    }
}

/// Whether `hash` satisfies `difficulty`
pub fn is_valid_proof(hash: &Hash256, difficulty: u32) -> bool {
    Target::from_difficulty(difficulty).is_valid_hash(hash)
}

/// How a nonce search ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningOutcome {
    /// Header now carries a valid nonce
    Solved,
    /// The abort check fired before a solution was found
    Aborted,
    /// Nonce space ran out
    Exhausted,
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    pub outcome: MiningOutcome,
    /// Last nonce tried (the winning one when solved)
    pub nonce: u64,
    /// Hash for `nonce`
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: Duration,
}

impl MiningResult {
    pub fn is_solved(&self) -> bool {
        self.outcome == MiningOutcome::Solved
    }

    /// Hashes per second, zero when no time was measured
    pub fn hash_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

/// Nonce search over a block header
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    pub target: Target,
    /// Pause between attempts, throttles CPU in simulations
    delay: Duration,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            target: Target::from_difficulty(difficulty),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Search nonces starting at `header.nonce`.
    ///
    /// `should_abort` runs before every attempt; returning `true` stops the
    /// search with the header left at the last nonce tried.
    pub fn mine<F>(&self, header: &mut BlockHeader, mut should_abort: F) -> MiningResult
    where
        F: FnMut() -> bool,
    {
        let start_time = Instant::now();
        let mut attempts = 0u64;

        loop {
            if should_abort() {
                return self.finish(header, MiningOutcome::Aborted, Hash256::zero(), attempts, start_time);
            }

            let hash = header.hash();
            attempts += 1;

            if self.target.is_valid_hash(&hash) {
                return self.finish(header, MiningOutcome::Solved, hash, attempts, start_time);
            }

            // Progress indicator every 100k attempts
            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }

            header.nonce = match header.nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    return self.finish(header, MiningOutcome::Exhausted, hash, attempts, start_time);
                }
            };

            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
        }
    }

    fn finish(
        &self,
        header: &BlockHeader,
        outcome: MiningOutcome,
        hash: Hash256,
        attempts: u64,
        start_time: Instant,
    ) -> MiningResult {
        MiningResult {
            outcome,
            nonce: header.nonce,
            hash,
            attempts,
            duration: start_time.elapsed(),
        }
    }
}
