use {
  crate::{
    arena::ArenaRef,
    bucket::bucketize_ns,
    profile::Sample,
    record::SampleRecord,
    sys::Timestamp,
  },
  hashbrown::{HashMap, hash_map::DefaultHashBuilder},
  std::time::Duration,
};

/// Cases tracked per table entry: four cpu/thread combinations crossed with
/// the three-way request-id axis.
pub(crate) const NUM_MATCHING_CASES: usize = 12;

/// Whether allocation and deallocation ran on the same CPU and thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CpuThreadMatchingStatus {
  pub cpu_matched: bool,
  pub thread_matched: bool,
}

impl CpuThreadMatchingStatus {
  pub(crate) const fn new(cpu_matched: bool, thread_matched: bool) -> Self {
    Self {
      cpu_matched,
      thread_matched,
    }
  }

  pub(crate) const fn value(self) -> usize {
    ((self.cpu_matched as usize) << 1) | self.thread_matched as usize
  }
}

/// Correlation of host request ids on the two sides of a pair: 0 when both
/// ids are present and equal, 1 when both are present and differ, 2 when
/// either is absent. The host never attaches request ids today, so folds
/// land in the absent column, but the full layout is kept so the emitted
/// schema stays stable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RpcMatchingStatus {
  value: usize,
}

impl RpcMatchingStatus {
  pub(crate) const ABSENT: Self = Self::new(0, 0);

  pub(crate) const fn new(alloc_id: u64, dealloc_id: u64) -> Self {
    let value = if alloc_id != 0 && dealloc_id != 0 {
      if alloc_id == dealloc_id { 0 } else { 1 }
    } else {
      2
    };

    Self { value }
  }
}

pub(crate) const fn matching_case_index(
  status: CpuThreadMatchingStatus,
  rpc: RpcMatchingStatus,
) -> usize {
  status.value() * 3 + rpc.value
}

/// Cpu/thread flags encoded by a case column.
pub(crate) const fn case_status(index: usize) -> CpuThreadMatchingStatus {
  CpuThreadMatchingStatus::new(index / 3 & 0b10 != 0, index / 3 & 0b01 != 0)
}

/// Table key: one allocation site paired with one deallocation site.
#[derive(Clone, Eq, Hash, PartialEq)]
pub(crate) struct PairKey {
  pub alloc: SampleRecord,
  pub dealloc: SampleRecord,
}

/// Online lifetime statistics per matching case, maintained with Welford's
/// algorithm.
#[derive(Clone)]
pub(crate) struct CaseStats {
  pub counts: [f64; NUM_MATCHING_CASES],
  pub m2_lifetimes_ns: [f64; NUM_MATCHING_CASES],
  pub max_lifetimes_ns: [f64; NUM_MATCHING_CASES],
  pub mean_lifetimes_ns: [f64; NUM_MATCHING_CASES],
  pub min_lifetimes_ns: [f64; NUM_MATCHING_CASES],
}

impl Default for CaseStats {
  fn default() -> Self {
    Self {
      counts: [0.0; NUM_MATCHING_CASES],
      m2_lifetimes_ns: [0.0; NUM_MATCHING_CASES],
      max_lifetimes_ns: [0.0; NUM_MATCHING_CASES],
      mean_lifetimes_ns: [0.0; NUM_MATCHING_CASES],
      min_lifetimes_ns: [f64::INFINITY; NUM_MATCHING_CASES],
    }
  }
}

impl CaseStats {
  fn fold(&mut self, index: usize, lifetime_ns: f64) {
    let old_mean_ns = self.mean_lifetimes_ns[index];

    self.mean_lifetimes_ns[index] +=
      (lifetime_ns - old_mean_ns) / (self.counts[index] + 1.0);
    self.m2_lifetimes_ns[index] += (lifetime_ns
      - self.mean_lifetimes_ns[index])
      * (self.mean_lifetimes_ns[index] - old_mean_ns);

    self.min_lifetimes_ns[index] =
      self.min_lifetimes_ns[index].min(lifetime_ns);
    self.max_lifetimes_ns[index] =
      self.max_lifetimes_ns[index].max(lifetime_ns);
    self.counts[index] += 1.0;
  }
}

/// Aggregates paired events keyed by (allocation site, deallocation site).
///
/// All storage comes from the arena, and the table carries the collection
/// window so an emitted profile can report its duration.
pub(crate) struct LifetimeTable {
  entries: HashMap<PairKey, CaseStats, DefaultHashBuilder, ArenaRef>,
  start_time: Timestamp,
  stop_time: Option<Timestamp>,
}

impl LifetimeTable {
  pub(crate) fn add_trace(
    &mut self,
    alloc: &SampleRecord,
    dealloc: &SampleRecord,
  ) {
    let status = CpuThreadMatchingStatus::new(
      alloc.cpu_id == dealloc.cpu_id,
      alloc.thread_id == dealloc.thread_id,
    );
    let index = matching_case_index(status, RpcMatchingStatus::ABSENT);
    let lifetime_ns = dealloc.creation_time.nanos_since(alloc.creation_time);

    self
      .entries
      .entry(PairKey {
        alloc: *alloc,
        dealloc: *dealloc,
      })
      .or_default()
      .fold(index, lifetime_ns);
  }

  pub(crate) fn duration(&self) -> Duration {
    self.stop_time.map_or(Duration::ZERO, |stop| {
      stop.saturating_duration_since(self.start_time)
    })
  }

  /// Expands every entry into one allocation/deallocation sample pair per
  /// populated case. Entry order is unspecified; within a pair the
  /// allocation row always comes first.
  pub(crate) fn for_each_sample(&self, mut func: impl FnMut(&Sample)) {
    let mut profile_id = 1;

    for (key, stats) in &self.entries {
      let allocated_size = key.alloc.allocated_size;

      // Size-class rounding never yields zero, but a zero divide is worse
      // than a dropped entry if the host misreports.
      if allocated_size == 0 {
        continue;
      }

      for index in 0..NUM_MATCHING_CASES {
        let count = stats.counts[index];

        if count == 0.0 {
          continue;
        }

        let bytes =
          (count * key.alloc.weight * allocated_size as f64).round() as u64;
        let scaled_count = bytes.div_ceil(allocated_size as u64) as i64;
        let stddev_ns =
          (stats.m2_lifetimes_ns[index] / count).max(0.0).sqrt();
        let status = case_status(index);

        let mut sample = Sample {
          allocated_size,
          allocator_deallocator_cpu_matched: status.cpu_matched,
          allocator_deallocator_thread_matched: status.thread_matched,
          count: scaled_count,
          depth: key.alloc.depth,
          lifetime_ns: bucketize_ns(stats.mean_lifetimes_ns[index]),
          max_lifetime_ns: bucketize_ns(stats.max_lifetimes_ns[index]),
          min_lifetime_ns: bucketize_ns(stats.min_lifetimes_ns[index]),
          profile_id,
          requested_alignment: key.alloc.requested_alignment,
          requested_size: key.alloc.requested_size,
          stack: key.alloc.stack,
          stddev_lifetime_ns: bucketize_ns(stddev_ns),
          sum: scaled_count * allocated_size as i64,
        };

        func(&sample);

        // The deallocation row carries the same statistics with a negated
        // count.
        sample.count = -scaled_count;
        sample.depth = key.dealloc.depth;
        sample.stack = key.dealloc.stack;

        func(&sample);

        profile_id += 1;
      }
    }
  }

  pub(crate) fn new(arena: ArenaRef, start_time: Timestamp) -> Self {
    Self {
      entries: HashMap::with_hasher_in(DefaultHashBuilder::default(), arena),
      start_time,
      stop_time: None,
    }
  }

  pub(crate) fn set_stop_time(&mut self, stop_time: Timestamp) {
    self.stop_time = Some(stop_time);
  }
}
