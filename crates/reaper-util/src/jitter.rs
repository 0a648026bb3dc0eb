//! Jittered intervals
//!
//! Many nodes draining at once would otherwise poll the cluster API in
//! lockstep, so every sleep is spread by up to a quarter of its length.

use rand::Rng;
use std::time::Duration;

/// Return `input` moved by a random deviation of at most 25%.
///
/// The result always lies in `[0.75 * input, 1.25 * input)`; inputs too small
/// to deviate by a whole unit are returned unchanged.
pub fn apply_jitter(input: u64) -> u64 {
    apply_jitter_with(input, &mut rand::thread_rng())
}

/// [`apply_jitter`] with a caller-supplied random source
pub fn apply_jitter_with<R: Rng + ?Sized>(input: u64, rng: &mut R) -> u64 {
    let deviation = input / 4;
    if deviation == 0 {
        return input;
    }
    input - deviation + rng.gen_range(0..2 * deviation)
}

/// Jitter a duration at millisecond resolution
pub fn jittered(base: Duration) -> Duration {
    let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(apply_jitter(millis))
}
