use {
  crate::sys::Timestamp,
  std::hash::{Hash, Hasher},
};

/// Deepest stack prefix a sample can retain.
pub const MAX_STACK_DEPTH: usize = 64;

/// Snapshot of a single sampled allocator event.
///
/// Two records compare equal when they describe the same call site and
/// object shape: stack prefix, depth, sizes, and alignment. The identity
/// fields (time, cpu, thread) and the sampling weight stay out of the
/// comparison so repeated events from one site collapse onto one
/// aggregation key.
#[derive(Clone, Copy, Debug)]
pub struct SampleRecord {
  pub allocated_size: usize,
  pub cpu_id: i32,
  pub creation_time: Timestamp,
  pub depth: usize,
  pub requested_alignment: usize,
  pub requested_size: usize,
  pub stack: [usize; MAX_STACK_DEPTH],
  pub thread_id: i64,
  pub weight: f64,
}

impl SampleRecord {
  /// The valid stack prefix.
  #[must_use]
  pub fn frames(&self) -> &[usize] {
    &self.stack[..self.depth]
  }
}

impl Default for SampleRecord {
  fn default() -> Self {
    Self {
      allocated_size: 0,
      cpu_id: -1,
      creation_time: Timestamp::default(),
      depth: 0,
      requested_alignment: 0,
      requested_size: 0,
      stack: [0; MAX_STACK_DEPTH],
      thread_id: 0,
      weight: 0.0,
    }
  }
}

impl PartialEq for SampleRecord {
  fn eq(&self, other: &Self) -> bool {
    self.depth == other.depth
      && self.requested_size == other.requested_size
      && self.requested_alignment == other.requested_alignment
      && self.allocated_size == other.allocated_size
      && self.frames() == other.frames()
  }
}

impl Eq for SampleRecord {}

impl Hash for SampleRecord {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.frames().hash(state);
    self.depth.hash(state);
    self.requested_size.hash(state);
    self.requested_alignment.hash(state);
    self.allocated_size.hash(state);
  }
}
