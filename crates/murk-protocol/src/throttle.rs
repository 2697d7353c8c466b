/// Rate limiting for the transfer engine.
///
/// [`Throttle`] is a token bucket shared by every transfer task via
/// `Arc`, one bucket per engine instance so two engines in one process
/// never fight over a global. A saturated bucket is a signal to defer,
/// not to block: callers that fail to take a token reschedule the work
/// without touching the network.
///
/// [`Backoff`] produces jittered retry delays for reconnect loops and
/// empty-poll sleeps. It is seedable so tests get deterministic delays.
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

/// Token bucket. Tokens refill continuously at `refill_per_sec` up to
/// `capacity`; one token covers one chunk-sized network operation.
pub struct Throttle {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl Throttle {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token. Returns false when the bucket is saturated; the
    /// caller must defer instead of spinning.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_many(1)
    }

    pub fn try_acquire_many(&self, tokens: u32) -> bool {
        let mut state = self.state.lock().expect("throttle lock");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        let needed = tokens as f64;
        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// How long until one token is available, for scheduling the retry.
    pub fn time_to_token(&self) -> Duration {
        let state = self.state.lock().expect("throttle lock");
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
    }
}

/// Exponential backoff with multiplicative jitter.
///
/// Delays double from `base` up to `max`; each delay is scaled by a
/// random factor in [0.5, 1.5) so restart storms de-synchronize.
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self::seeded_opt(base, max, None)
    }

    /// Deterministic delays for tests.
    pub fn seeded(base: Duration, max: Duration, seed: u64) -> Self {
        Self::seeded_opt(base, max, Some(seed))
    }

    fn seeded_opt(base: Duration, max: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base,
            max,
            current: base,
            rng,
        }
    }

    /// Next delay to sleep, with jitter applied. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let jitter: f64 = self.rng.gen_range(0.5..1.5);
        let delay = self.current.mul_f64(jitter).min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the base delay after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}
