use {
  crate::{
    export::{ExportError, build_pprof_profile},
    record::MAX_STACK_DEPTH,
    table::LifetimeTable,
  },
  prost::Message,
  serde::{Serialize, Serializer, ser::SerializeStruct},
  std::{io::Write, time::Duration},
};

/// Kind of profile a collection run produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ProfileType {
  /// Paired allocation/deallocation lifetimes.
  Lifetimes,
}

/// One expanded row of an emitted profile.
///
/// Rows come in pairs: an allocation row with a positive count, then a
/// deallocation row with the matching negative count, sharing `profile_id`
/// and every statistic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
  pub allocated_size: usize,
  pub allocator_deallocator_cpu_matched: bool,
  pub allocator_deallocator_thread_matched: bool,
  pub count: i64,
  pub depth: usize,
  pub lifetime_ns: u64,
  pub max_lifetime_ns: u64,
  pub min_lifetime_ns: u64,
  pub profile_id: u64,
  pub requested_alignment: usize,
  pub requested_size: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
  pub stddev_lifetime_ns: u64,
  pub sum: i64,
}

impl Sample {
  /// The valid stack prefix.
  #[must_use]
  pub fn frames(&self) -> &[usize] {
    &self.stack[..self.depth]
  }
}

impl Serialize for Sample {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("Sample", 13)?;
    state.serialize_field("profile_id", &self.profile_id)?;
    state.serialize_field("count", &self.count)?;
    state.serialize_field("sum", &self.sum)?;
    state.serialize_field("requested_size", &self.requested_size)?;
    state.serialize_field("requested_alignment", &self.requested_alignment)?;
    state.serialize_field("allocated_size", &self.allocated_size)?;
    state.serialize_field("lifetime_ns", &self.lifetime_ns)?;
    state.serialize_field("stddev_lifetime_ns", &self.stddev_lifetime_ns)?;
    state.serialize_field("min_lifetime_ns", &self.min_lifetime_ns)?;
    state.serialize_field("max_lifetime_ns", &self.max_lifetime_ns)?;
    state.serialize_field(
      "cpu_matched",
      &self.allocator_deallocator_cpu_matched,
    )?;
    state.serialize_field(
      "thread_matched",
      &self.allocator_deallocator_thread_matched,
    )?;
    state.serialize_field("stack", &self.frames())?;
    state.end()
  }
}

/// Everything a stopped profiler observed.
///
/// Holds the aggregation table, and through it an arena reference, until
/// the profile itself is dropped.
pub struct Profile {
  table: Option<LifetimeTable>,
}

impl Profile {
  /// Length of the collection window.
  #[must_use]
  pub fn duration(&self) -> Duration {
    self
      .table
      .as_ref()
      .map_or(Duration::ZERO, LifetimeTable::duration)
  }

  pub(crate) fn empty() -> Self {
    Self { table: None }
  }

  /// Streams the profile as JSON.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  /// Streams the profile in the pprof proto format.
  ///
  /// # Errors
  ///
  /// Returns an error if the profile cannot be encoded or written.
  pub fn export_pprof<W: Write>(
    &self,
    mut writer: W,
  ) -> Result<(), ExportError> {
    let profile = build_pprof_profile(self);
    let mut buffer = Vec::with_capacity(4096);

    profile.encode(&mut buffer)?;
    writer.write_all(&buffer)?;

    Ok(())
  }

  pub(crate) fn from_table(table: LifetimeTable) -> Self {
    Self { table: Some(table) }
  }

  /// Invokes `func` for every expanded sample row.
  pub fn iterate(&self, func: impl FnMut(&Sample)) {
    if let Some(table) = &self.table {
      table.for_each_sample(func);
    }
  }

  #[must_use]
  pub fn profile_type(&self) -> ProfileType {
    ProfileType::Lifetimes
  }

  /// Collects every expanded sample row.
  #[must_use]
  pub fn samples(&self) -> Vec<Sample> {
    let mut samples = Vec::new();

    self.iterate(|sample| samples.push(*sample));

    samples
  }
}

impl Serialize for Profile {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let duration_ns =
      u64::try_from(self.duration().as_nanos()).unwrap_or(u64::MAX);

    let mut state = serializer.serialize_struct("Profile", 3)?;
    state.serialize_field("profile_type", "lifetimes")?;
    state.serialize_field("duration_ns", &duration_ns)?;
    state.serialize_field("samples", &self.samples())?;
    state.end()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    event::{AllocHandle, StackTrace},
    registry::ProfilerRegistry,
    sys::{Timestamp, testing::ScriptedProbe},
  };
  use std::sync::Arc;

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

  fn scripted() -> (Arc<ScriptedProbe>, ProfilerRegistry) {
    let probe = ScriptedProbe::new();
    let registry = ProfilerRegistry::with_probe(probe.clone());

    (probe, registry)
  }

  #[test]
  fn paired_event_expands_into_matching_rows() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    probe.set_cpu(1);
    probe.set_thread(10);
    registry.report_malloc(&trace(1, &[0xa, 0xb], 1_000));

    probe.set_now(1_500);
    probe.set_dealloc_stack(&[0xc]);
    registry.report_free(AllocHandle(1));

    probe.set_now(2_000);
    let profile = profiler.stop();
    let samples = profile.samples();

    assert_eq!(profile.profile_type(), ProfileType::Lifetimes);
    assert_eq!(profile.duration(), Duration::from_nanos(2_000));
    assert_eq!(samples.len(), 2);

    let alloc = samples[0];
    let dealloc = samples[1];

    assert_eq!(alloc.count, 1);
    assert_eq!(alloc.frames(), [0xa, 0xb]);
    assert_eq!(dealloc.count, -1);
    assert_eq!(dealloc.frames(), [0xc]);

    for sample in [alloc, dealloc] {
      assert_eq!(sample.profile_id, 1);
      assert_eq!(sample.sum, 16);
      assert_eq!(sample.requested_size, 16);
      assert_eq!(sample.requested_alignment, 8);
      assert_eq!(sample.allocated_size, 16);
      assert_eq!(sample.lifetime_ns, 100);
      assert_eq!(sample.min_lifetime_ns, 100);
      assert_eq!(sample.max_lifetime_ns, 100);
      assert_eq!(sample.stddev_lifetime_ns, 1);
      assert!(sample.allocator_deallocator_cpu_matched);
      assert!(sample.allocator_deallocator_thread_matched);
    }
  }

  #[test]
  fn free_without_observed_malloc_yields_an_empty_profile() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    probe.set_dealloc_stack(&[0xc]);
    registry.report_free(AllocHandle(99));

    assert!(profiler.stop().samples().is_empty());
  }

  #[test]
  fn unfreed_malloc_is_discarded_without_leaking() {
    let (_probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    registry.report_malloc(&trace(1, &[0xa], 0));

    let profile = profiler.stop();
    assert!(profile.samples().is_empty());
    assert!(registry.arena().is_live());

    drop(profile);
    assert!(!registry.arena().is_live());
    assert_eq!(registry.arena().references(), 0);
  }

  #[test]
  fn cross_cpu_deallocation_is_flagged() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    probe.set_cpu(0);
    probe.set_thread(5);
    registry.report_malloc(&trace(1, &[0xa], 0));

    probe.set_cpu(1);
    probe.set_now(250);
    probe.set_dealloc_stack(&[0xb]);
    registry.report_free(AllocHandle(1));

    let samples = profiler.stop().samples();
    assert_eq!(samples.len(), 2);

    for sample in &samples {
      assert!(!sample.allocator_deallocator_cpu_matched);
      assert!(sample.allocator_deallocator_thread_matched);
    }
  }

  #[test]
  fn repeated_sites_aggregate_into_one_pair() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    registry.report_malloc(&trace(1, &[0xa], 0));
    probe.set_now(100);
    probe.set_dealloc_stack(&[0xc]);
    registry.report_free(AllocHandle(1));

    registry.report_malloc(&trace(2, &[0xa], 1_000));
    probe.set_now(1_300);
    registry.report_free(AllocHandle(2));

    let samples = profiler.stop().samples();
    assert_eq!(samples.len(), 2);

    // Lifetimes 100ns and 300ns: mean 200 buckets to 100; the running
    // spread folds to a stddev of sqrt(5000), which buckets to 10.
    let alloc = samples[0];
    assert_eq!(alloc.lifetime_ns, 100);
    assert_eq!(alloc.stddev_lifetime_ns, 10);
    assert_eq!(alloc.min_lifetime_ns, 100);
    assert_eq!(alloc.max_lifetime_ns, 100);

    // ceil(round(2 * 8/17 * 16) / 16) objects of 16 bytes.
    assert_eq!(alloc.count, 1);
    assert_eq!(alloc.sum, 16);
  }

  #[test]
  fn every_positive_row_has_its_negative_twin() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    for handle in 0..6u64 {
      probe.set_cpu((handle % 2) as i32);
      registry.report_malloc(&trace(
        handle,
        &[0x100 + handle as usize],
        handle * 10,
      ));
      probe.set_now(handle * 10 + 100);
      probe.set_dealloc_stack(&[0x200 + (handle % 3) as usize]);
      registry.report_free(AllocHandle(handle));
    }

    let samples = profiler.stop().samples();
    assert!(!samples.is_empty());
    assert_eq!(samples.len() % 2, 0);

    for pair in samples.chunks(2) {
      let (alloc, dealloc) = (pair[0], pair[1]);

      assert_eq!(alloc.profile_id, dealloc.profile_id);
      assert_eq!(alloc.count, -dealloc.count);
      assert!(alloc.count > 0);
      assert_eq!(alloc.sum, dealloc.sum);
      assert_eq!(alloc.lifetime_ns, dealloc.lifetime_ns);
      assert_eq!(alloc.stddev_lifetime_ns, dealloc.stddev_lifetime_ns);
      assert_eq!(alloc.min_lifetime_ns, dealloc.min_lifetime_ns);
      assert_eq!(alloc.max_lifetime_ns, dealloc.max_lifetime_ns);
      assert!(alloc.min_lifetime_ns <= alloc.lifetime_ns);
      assert!(alloc.lifetime_ns <= alloc.max_lifetime_ns);
      assert_eq!(
        alloc.allocator_deallocator_cpu_matched,
        dealloc.allocator_deallocator_cpu_matched
      );
      assert_eq!(
        alloc.allocator_deallocator_thread_matched,
        dealloc.allocator_deallocator_thread_matched
      );
    }

    let mut ids: Vec<u64> =
      samples.iter().map(|sample| sample.profile_id).collect();
    ids.dedup();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), samples.len() / 2);
  }

  #[test]
  fn exports_json_with_truncated_stacks() {
    let (probe, registry) = scripted();
    let mut profiler = registry.start_profile();

    registry.report_malloc(&trace(1, &[0xa, 0xb], 0));
    probe.set_now(450);
    probe.set_dealloc_stack(&[0xc]);
    registry.report_free(AllocHandle(1));
    probe.set_now(500);

    let profile = profiler.stop();
    let mut encoded = Vec::new();

    profile.export_json(&mut encoded).unwrap();

    let value: serde_json::Value =
      serde_json::from_slice(&encoded).unwrap();

    assert_eq!(value["profile_type"], "lifetimes");
    assert_eq!(value["duration_ns"], 500);

    let samples = value["samples"].as_array().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0]["stack"].as_array().unwrap().len(), 2);
    assert_eq!(samples[1]["stack"].as_array().unwrap().len(), 1);
  }
}
