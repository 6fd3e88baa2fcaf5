use {
  crate::sys::Timestamp,
  nohash_hasher::IsEnabled,
  smallvec::SmallVec,
  std::hash::{Hash, Hasher},
};

/// Frames kept inline before an event buffer spills to the heap.
pub const STACK_INLINE_DEPTH: usize = 32;

/// Opaque identifier the host allocator assigns to each sampled allocation.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct AllocHandle(pub u64);

impl Hash for AllocHandle {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u64(self.0);
  }
}

impl IsEnabled for AllocHandle {}

/// One sampled allocation, as reported by the host allocator.
#[derive(Clone, Debug)]
pub struct StackTrace {
  /// Size after size-class and page rounding.
  pub allocated_size: usize,
  pub allocation_time: Timestamp,
  pub frames: SmallVec<[usize; STACK_INLINE_DEPTH]>,
  pub handle: AllocHandle,
  pub requested_alignment: usize,
  pub requested_size: usize,
  /// Raw sampling weight in bytes: the population volume this sample stands
  /// in for.
  pub weight: u64,
}

impl StackTrace {
  #[must_use]
  pub fn new(
    handle: AllocHandle,
    frames: &[usize],
    requested_size: usize,
    requested_alignment: usize,
    allocated_size: usize,
    weight: u64,
    allocation_time: Timestamp,
  ) -> Self {
    Self {
      allocated_size,
      allocation_time,
      frames: SmallVec::from_slice(frames),
      handle,
      requested_alignment,
      requested_size,
      weight,
    }
  }
}
