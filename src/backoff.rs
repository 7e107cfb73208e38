use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default backoff parameters: 200ms base, doubling per attempt,
/// truncated at 10s, with ±25% jitter.
const BASE_MS: f64 = 200.0;
const MULTIPLIER: f64 = 2.0;
const MAX_MS: f64 = 10_000.0;
const JITTER: f64 = 0.25;

/// Truncated exponential backoff with jitter. This is the default
/// retry delay policy; callers may swap in any
/// `Fn(attempt) -> Duration` through [`crate::Opts::backoff`].
pub fn exponential(attempt: u32) -> Duration {
    custom(BASE_MS, MULTIPLIER, MAX_MS, JITTER)(attempt)
}

/// Build an exponential policy with explicit parameters.
///
/// `delay = min(max_ms, base_ms * multiplier^attempt) * (1 ± jitter)`
pub fn custom(
    base_ms: f64,
    multiplier: f64,
    max_ms: f64,
    jitter: f64,
) -> impl Fn(u32) -> Duration + Send + Sync + Clone {
    move |attempt| {
        let raw = (base_ms * multiplier.powi(attempt as i32)).min(max_ms);
        let scaled = raw * (1.0 + jitter * jitter_unit());
        Duration::from_millis(scaled.max(0.0) as u64)
    }
}

/// A value in [-1, 1), cheap and good enough to de-synchronize
/// reconnect storms. Sourced from the clock's sub-second noise so the
/// crate does not need an RNG dependency.
fn jitter_unit() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (f64::from(nanos) / 500_000_000.0) - 1.0
}
