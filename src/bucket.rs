/// Maps a lifetime in nanoseconds onto a coarse bucket boundary.
///
/// Lifetimes at or below 1ns collapse to 1ns: nothing allocates and frees an
/// object within a nanosecond, so values that small indicate clock skew
/// rather than real behavior. Between 1ns and 1ms the bucket is the largest
/// power of ten not exceeding the lifetime; beyond 1ms lifetimes floor to
/// the nearest millisecond.
#[must_use]
pub fn bucketize_ns(lifetime_ns: f64) -> u64 {
  if lifetime_ns < 1_000_000.0 {
    if lifetime_ns <= 1.0 {
      return 1;
    }

    let mut cutoff_ns = 10u64;

    while cutoff_ns <= 1_000_000 {
      if lifetime_ns < cutoff_ns as f64 {
        return cutoff_ns / 10;
      }

      cutoff_ns *= 10;
    }
  }

  (lifetime_ns / 1_000_000.0) as u64 * 1_000_000
}
