use std::time::Duration;

pub fn exponential_jitter_backoff(
    base: Duration,
    attempt: u32,
    max: Duration,
    jitter_frac: f32,
) -> Duration {
    let capped_attempt = attempt.min(8);
    let factor = 1u32.checked_shl(capped_attempt).unwrap_or(1 << 8);
    let raw = base.saturating_mul(factor);
    let capped = raw.min(max);
    let nanos = capped.as_nanos() as i128;
    let jitter = ((nanos as f64) * (jitter_frac as f64)).round() as i128;
    let delta = if jitter > 0 {
        fastrand::i128(-jitter..=jitter)
    } else {
        0
    };
    let result = (nanos + delta).clamp(0, max.as_nanos() as i128) as u64;
    Duration::from_nanos(result)
}
