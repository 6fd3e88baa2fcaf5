use {
  crate::{
    arena::ArenaHost,
    config::ProfilerConfig,
    event::{AllocHandle, StackTrace},
    profiler::{ProfilerHandle, ProfilerSlot},
    sys::{OsProbe, SysProbe, Timestamp},
  },
  spin::Mutex,
  std::sync::Arc,
};

struct RegistryInner {
  arena: ArenaHost,
  probe: Arc<dyn SysProbe>,
  profilers: Mutex<Vec<Arc<ProfilerSlot>>>,
}

/// Fan-out point between the host allocator and every active profiler.
///
/// Broadcasts hold the list lock for the entire walk, so each profiler sees
/// its events in a serial order and its maps need no locking of their own.
/// The walk itself never allocates.
#[derive(Clone)]
pub struct ProfilerRegistry {
  inner: Arc<RegistryInner>,
}

impl ProfilerRegistry {
  /// Number of currently registered profilers.
  #[must_use]
  pub fn active_profilers(&self) -> usize {
    self.inner.profilers.lock().len()
  }

  pub(crate) fn arena(&self) -> &ArenaHost {
    &self.inner.arena
  }

  pub(crate) fn detach(&self, slot: &Arc<ProfilerSlot>) {
    let mut profilers = self.inner.profilers.lock();
    let index = profilers
      .iter()
      .position(|candidate| Arc::ptr_eq(candidate, slot))
      .expect("stopping a profiler that is not registered");

    profilers.swap_remove(index);
  }

  #[must_use]
  pub fn new() -> Self {
    Self::with_probe(Arc::new(OsProbe))
  }

  pub(crate) fn now(&self) -> Timestamp {
    self.inner.probe.now()
  }

  /// Forwards one sampled deallocation to every active profiler.
  pub fn report_free(&self, handle: AllocHandle) {
    let profilers = self.inner.profilers.lock();

    for slot in profilers.iter() {
      slot.core.lock().report_free(handle, &*self.inner.probe);
    }
  }

  /// Forwards one sampled allocation to every active profiler.
  pub fn report_malloc(&self, trace: &StackTrace) {
    let profilers = self.inner.profilers.lock();

    for slot in profilers.iter() {
      slot.core.lock().report_malloc(trace, &*self.inner.probe);
    }
  }

  /// Registers a new profiler and returns its owning handle.
  #[must_use]
  pub fn start_profile(&self) -> ProfilerHandle {
    self.start_profile_with_config(ProfilerConfig::default())
  }

  #[must_use]
  pub fn start_profile_with_config(
    &self,
    config: ProfilerConfig,
  ) -> ProfilerHandle {
    let slot = ProfilerSlot::new(
      self.inner.arena.acquire(),
      config,
      self.inner.probe.now(),
    );

    self.inner.profilers.lock().push(Arc::clone(&slot));

    ProfilerHandle::new(self.clone(), slot)
  }

  /// Builds a registry that reads identity and time through `probe`.
  #[must_use]
  pub fn with_probe(probe: Arc<dyn SysProbe>) -> Self {
    Self {
      inner: Arc::new(RegistryInner {
        arena: ArenaHost::new(),
        probe,
        profilers: Mutex::new(Vec::new()),
      }),
    }
  }
}

impl Default for ProfilerRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sys::testing::ScriptedProbe;
  use std::{collections::HashMap, thread};

  fn trace(handle: u64, frames: &[usize], time_ns: u64) -> StackTrace {
    StackTrace::new(
      AllocHandle(handle),
      frames,
      16,
      8,
      16,
      8,
      Timestamp::from_nanos(time_ns),
    )
  }

  #[test]
  fn broadcasts_reach_every_active_profiler() {
    let probe = ScriptedProbe::new();
    let registry = ProfilerRegistry::with_probe(probe.clone());
    let mut first = registry.start_profile();
    let mut second = registry.start_profile();

    registry.report_malloc(&trace(1, &[0xa], 0));
    probe.set_now(400);
    probe.set_dealloc_stack(&[0xb]);
    registry.report_free(AllocHandle(1));

    assert_eq!(first.stop().samples().len(), 2);
    assert_eq!(second.stop().samples().len(), 2);
  }

  #[test]
  fn profilers_only_see_events_after_registration() {
    let probe = ScriptedProbe::new();
    let registry = ProfilerRegistry::with_probe(probe.clone());
    let mut first = registry.start_profile();

    registry.report_malloc(&trace(1, &[0xa], 0));

    let mut second = registry.start_profile();

    probe.set_now(300);
    probe.set_dealloc_stack(&[0xb]);
    registry.report_free(AllocHandle(1));

    assert_eq!(first.stop().samples().len(), 2);
    assert!(second.stop().samples().is_empty());
  }

  #[test]
  fn events_with_no_active_profiler_are_dropped() {
    let registry = ProfilerRegistry::new();

    registry.report_malloc(&trace(1, &[0xa], 0));
    registry.report_free(AllocHandle(1));

    assert_eq!(registry.active_profilers(), 0);
    assert!(!registry.arena().is_live());
  }

  #[test]
  fn concurrent_reporters_produce_balanced_pairs() {
    let registry = ProfilerRegistry::new();
    let mut profiler = registry.start_profile();

    let workers: Vec<_> = (0..4u64)
      .map(|worker| {
        let registry = registry.clone();

        thread::spawn(move || {
          for sequence in 0..16u64 {
            let handle = worker * 100 + sequence;

            registry.report_malloc(&StackTrace::new(
              AllocHandle(handle),
              &[0x1000 + worker as usize],
              32,
              8,
              32,
              64,
              OsProbe.now(),
            ));
            registry.report_free(AllocHandle(handle));
          }
        })
      })
      .collect();

    for worker in workers {
      worker.join().unwrap();
    }

    assert_eq!(profiler.in_flight(), 0);

    let samples = profiler.stop().samples();
    let mut by_pair: HashMap<u64, Vec<i64>> = HashMap::new();

    for sample in &samples {
      by_pair.entry(sample.profile_id).or_default().push(sample.count);
    }

    for counts in by_pair.values() {
      assert_eq!(counts.len(), 2);
      assert_eq!(counts[0], -counts[1]);
    }
  }
}
