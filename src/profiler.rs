use {
  crate::{
    arena::ArenaRef,
    config::ProfilerConfig,
    event::{AllocHandle, StackTrace},
    profile::Profile,
    record::SampleRecord,
    registry::ProfilerRegistry,
    sys::{SysProbe, Timestamp},
    table::LifetimeTable,
  },
  hashbrown::HashMap,
  nohash_hasher::BuildNoHashHasher,
  spin::Mutex,
  std::sync::Arc,
};

type InFlightMap =
  HashMap<AllocHandle, SampleRecord, BuildNoHashHasher<AllocHandle>, ArenaRef>;

struct ActiveState {
  allocs: InFlightMap,
  reports: LifetimeTable,
}

/// Mutable profiler state. Access is serialized by the registry lock, so no
/// locking happens beyond the cell the state lives in.
pub(crate) struct ProfilerCore {
  config: ProfilerConfig,
  state: Option<ActiveState>,
}

impl ProfilerCore {
  pub(crate) fn in_flight(&self) -> usize {
    self.state.as_ref().map_or(0, |state| state.allocs.len())
  }

  fn new(
    arena: ArenaRef,
    config: ProfilerConfig,
    start_time: Timestamp,
  ) -> Self {
    let reports = LifetimeTable::new(arena.clone(), start_time);

    Self {
      config: config.normalized(),
      state: Some(ActiveState {
        allocs: InFlightMap::with_hasher_in(
          BuildNoHashHasher::default(),
          arena,
        ),
        reports,
      }),
    }
  }

  pub(crate) fn report_free(
    &mut self,
    handle: AllocHandle,
    probe: &dyn SysProbe,
  ) {
    let Some(state) = self.state.as_mut() else {
      return;
    };

    // A deallocation whose allocation predates this profiler is expected.
    let Some(alloc) = state.allocs.remove(&handle) else {
      return;
    };

    let mut dealloc = SampleRecord {
      allocated_size: alloc.allocated_size,
      creation_time: probe.now(),
      cpu_id: probe.current_cpu(),
      requested_alignment: alloc.requested_alignment,
      requested_size: alloc.requested_size,
      thread_id: probe.current_thread(),
      ..SampleRecord::default()
    };

    dealloc.depth = probe.capture_stack(
      &mut dealloc.stack[..self.config.max_stack_depth],
      self.config.dealloc_skip_frames,
    );

    state.reports.add_trace(&alloc, &dealloc);
  }

  pub(crate) fn report_malloc(
    &mut self,
    trace: &StackTrace,
    probe: &dyn SysProbe,
  ) {
    let Some(state) = self.state.as_mut() else {
      return;
    };

    let depth = trace.frames.len().min(self.config.max_stack_depth);

    let mut record = SampleRecord {
      allocated_size: trace.allocated_size,
      cpu_id: probe.current_cpu(),
      creation_time: trace.allocation_time,
      depth,
      requested_alignment: trace.requested_alignment,
      requested_size: trace.requested_size,
      thread_id: probe.current_thread(),
      // Dividing by the requested size turns the byte weight into an
      // expected object count.
      weight: trace.weight as f64 / (trace.requested_size as f64 + 1.0),
      ..SampleRecord::default()
    };

    record.stack[..depth].copy_from_slice(&trace.frames[..depth]);

    state.allocs.insert(trace.handle, record);
  }

  pub(crate) fn take_stopped(
    &mut self,
    stop_time: Timestamp,
  ) -> Option<LifetimeTable> {
    let state = self.state.take()?;
    let mut reports = state.reports;

    reports.set_stop_time(stop_time);

    // The in-flight map is discarded with the rest of the state; a free
    // arriving for one of its handles no longer finds this profiler.
    Some(reports)
  }
}

pub(crate) struct ProfilerSlot {
  pub(crate) core: Mutex<ProfilerCore>,
}

impl ProfilerSlot {
  pub(crate) fn new(
    arena: ArenaRef,
    config: ProfilerConfig,
    start_time: Timestamp,
  ) -> Arc<Self> {
    Arc::new(Self {
      core: Mutex::new(ProfilerCore::new(arena, config, start_time)),
    })
  }
}

/// Owning handle for an active profiler.
///
/// Dropping the handle stops the profiler and discards its profile.
pub struct ProfilerHandle {
  registry: ProfilerRegistry,
  slot: Option<Arc<ProfilerSlot>>,
}

impl ProfilerHandle {
  /// Sampled allocations currently awaiting their deallocation.
  #[must_use]
  pub fn in_flight(&self) -> usize {
    self
      .slot
      .as_ref()
      .map_or(0, |slot| slot.core.lock().in_flight())
  }

  pub(crate) fn new(
    registry: ProfilerRegistry,
    slot: Arc<ProfilerSlot>,
  ) -> Self {
    Self {
      registry,
      slot: Some(slot),
    }
  }

  /// Stops the profiler and returns everything it aggregated.
  ///
  /// The first call fixes the stop time, detaches the profiler, and hands
  /// its table over; later calls return an empty profile.
  pub fn stop(&mut self) -> Profile {
    let Some(slot) = self.slot.take() else {
      return Profile::empty();
    };

    let stop_time = self.registry.now();
    self.registry.detach(&slot);

    let table = slot
      .core
      .lock()
      .take_stopped(stop_time)
      .expect("profiler already stopped while registered");

    Profile::from_table(table)
  }
}

impl Drop for ProfilerHandle {
  fn drop(&mut self) {
    if self.slot.is_some() {
      drop(self.stop());
    }
  }
}
