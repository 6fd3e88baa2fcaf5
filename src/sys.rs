use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock instant in nanoseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(u64);

impl Timestamp {
  #[must_use]
  pub const fn from_nanos(nanos: u64) -> Self {
    Self(nanos)
  }

  #[must_use]
  pub const fn nanos(self) -> u64 {
    self.0
  }

  /// Signed distance from `earlier`, in nanoseconds.
  ///
  /// The subtraction happens in the integer domain; converting epoch-scale
  /// timestamps to `f64` first would round each one to a ~256ns grid and
  /// destroy exactly the short lifetimes being measured.
  #[must_use]
  pub fn nanos_since(self, earlier: Timestamp) -> f64 {
    (self.0 as i64).wrapping_sub(earlier.0 as i64) as f64
  }

  #[must_use]
  pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
    Duration::from_nanos(self.0.saturating_sub(earlier.0))
  }
}

/// Identity and stack primitives the profiler reads from its host
/// environment.
///
/// Event handlers run in allocator context, so implementations must not
/// allocate through the host allocator.
pub trait SysProbe: Send + Sync {
  /// Writes the caller's stack into `frames`, skipping `skip` frames below
  /// the capture machinery, and returns the number of frames written.
  fn capture_stack(&self, frames: &mut [usize], skip: usize) -> usize;

  /// Logical CPU executing the calling thread, or -1 if unknown.
  fn current_cpu(&self) -> i32;

  /// OS identifier of the calling thread.
  fn current_thread(&self) -> i64;

  /// Current wall-clock time.
  fn now(&self) -> Timestamp;
}

/// `SysProbe` backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsProbe;

impl SysProbe for OsProbe {
  fn capture_stack(&self, frames: &mut [usize], skip: usize) -> usize {
    let mut depth = 0;
    let mut remaining_skip = skip;

    // SAFETY: only instruction pointers of the current thread are read; no
    // symbolization happens inside the callback.
    unsafe {
      backtrace::trace_unsynchronized(|frame| {
        let ip = frame.ip() as usize;

        if ip == 0 {
          return true;
        }

        if remaining_skip > 0 {
          remaining_skip -= 1;
          return true;
        }

        if depth >= frames.len() {
          return false;
        }

        frames[depth] = ip;
        depth += 1;

        true
      });
    }

    depth
  }

  #[cfg(target_os = "linux")]
  fn current_cpu(&self) -> i32 {
    // SAFETY: sched_getcpu has no preconditions.
    unsafe { libc::sched_getcpu() }
  }

  #[cfg(not(target_os = "linux"))]
  fn current_cpu(&self) -> i32 {
    -1
  }

  #[cfg(target_os = "linux")]
  fn current_thread(&self) -> i64 {
    // SAFETY: gettid has no preconditions.
    i64::from(unsafe { libc::gettid() })
  }

  #[cfg(not(target_os = "linux"))]
  fn current_thread(&self) -> i64 {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as i64 }
  }

  fn now(&self) -> Timestamp {
    let elapsed = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or(Duration::ZERO);

    Timestamp::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamp_differences_are_signed() {
    let earlier = Timestamp::from_nanos(1_000);
    let later = Timestamp::from_nanos(1_750);

    assert_eq!(later.nanos_since(earlier), 750.0);
    assert_eq!(earlier.nanos_since(later), -750.0);
    assert_eq!(
      earlier.saturating_duration_since(later),
      Duration::ZERO
    );
  }

  #[test]
  fn epoch_scale_differences_stay_exact() {
    // Both operands sit beyond f64's integer precision; only an integer
    // subtraction keeps a 500ns gap from rounding to 256 or 512.
    let alloc = Timestamp::from_nanos(1_700_000_000_000_000_000);
    let dealloc = Timestamp::from_nanos(1_700_000_000_000_000_500);

    assert_eq!(dealloc.nanos_since(alloc), 500.0);
    assert_eq!(alloc.nanos_since(dealloc), -500.0);

    let barely_later = Timestamp::from_nanos(1_700_000_000_000_000_007);
    assert_eq!(barely_later.nanos_since(alloc), 7.0);
  }

  #[test]
  fn os_probe_captures_the_current_stack() {
    let mut frames = [0usize; 16];
    let depth = OsProbe.capture_stack(&mut frames, 0);

    assert!(depth > 0);
    assert!(frames[..depth].iter().all(|ip| *ip != 0));
  }

  #[test]
  fn os_probe_reports_a_thread_id() {
    assert_ne!(OsProbe.current_thread(), 0);
  }
}
