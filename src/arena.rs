use {
  allocator_api2::alloc::{AllocError, Allocator},
  memmap2::MmapMut,
  smallvec::SmallVec,
  spin::Mutex,
  std::{
    alloc::Layout,
    ptr::NonNull,
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
  },
};

/// Granularity of the mappings backing an arena.
const CHUNK_BYTES: usize = 256 * 1024;

/// Bump allocator over anonymous mappings.
///
/// Profiler metadata draws from this region instead of the process heap, so
/// bookkeeping inside allocator callbacks never re-enters the host
/// allocator. Freed blocks are not recycled; the region is reclaimed
/// wholesale at teardown, which requires the outstanding-allocation count to
/// have returned to zero.
pub(crate) struct Arena {
  chunks: Mutex<SmallVec<[Chunk; 4]>>,
  live: AtomicUsize,
}

struct Chunk {
  base: NonNull<u8>,
  map: MmapMut,
  used: usize,
}

// SAFETY: `base` points into `map`, which owns the region, and the chunk
// list is only reached through the arena lock.
unsafe impl Send for Chunk {}

impl Chunk {
  fn carve(&mut self, layout: Layout) -> Option<NonNull<[u8]>> {
    let start = self.used.next_multiple_of(layout.align());
    let end = start.checked_add(layout.size())?;

    if end > self.map.len() {
      return None;
    }

    self.used = end;

    // SAFETY: `start + size` was bounds-checked against the mapping.
    let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) };

    Some(NonNull::slice_from_raw_parts(ptr, layout.size()))
  }

  fn reserve(min_bytes: usize) -> Result<Self, AllocError> {
    let mut map =
      MmapMut::map_anon(CHUNK_BYTES.max(min_bytes)).map_err(|_| AllocError)?;
    let base = NonNull::new(map.as_mut_ptr()).ok_or(AllocError)?;

    Ok(Self { base, map, used: 0 })
  }
}

impl Arena {
  fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
    if layout.size() == 0 {
      return Ok(NonNull::slice_from_raw_parts(dangling(layout), 0));
    }

    let mut chunks = self.chunks.lock();

    if let Some(ptr) = chunks.last_mut().and_then(|chunk| chunk.carve(layout))
    {
      self.live.fetch_add(1, Ordering::Relaxed);
      return Ok(ptr);
    }

    let mut chunk = Chunk::reserve(layout.size() + layout.align())?;
    let ptr = chunk
      .carve(layout)
      .expect("fresh chunk rejected its first allocation");

    chunks.push(chunk);
    self.live.fetch_add(1, Ordering::Relaxed);

    Ok(ptr)
  }

  fn deallocate(&self, layout: Layout) {
    if layout.size() == 0 {
      return;
    }

    self.live.fetch_sub(1, Ordering::Relaxed);
  }

  fn live_allocations(&self) -> usize {
    self.live.load(Ordering::Relaxed)
  }

  fn new() -> Self {
    Self {
      chunks: Mutex::new(SmallVec::new()),
      live: AtomicUsize::new(0),
    }
  }
}

fn dangling(layout: Layout) -> NonNull<u8> {
  // Alignment is nonzero, so this always forms a valid dangling pointer.
  unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
}

#[derive(Default)]
struct ArenaSlot {
  arena: Option<Arc<Arena>>,
  refcount: u32,
}

/// Process-wide slot holding the arena pointer and its reference count.
///
/// The slot lock is held only across reference construction and teardown,
/// never while allocating through the arena.
#[derive(Clone, Default)]
pub struct ArenaHost {
  slot: Arc<Mutex<ArenaSlot>>,
}

impl ArenaHost {
  /// Takes a new reference, creating the arena on the zero-to-one
  /// transition.
  #[must_use]
  pub fn acquire(&self) -> ArenaRef {
    let mut slot = self.slot.lock();

    slot.refcount += 1;

    if slot.refcount == 1 {
      assert!(
        slot.arena.is_none(),
        "arena still present before its first reference"
      );
      slot.arena = Some(Arc::new(Arena::new()));
    }

    let arena =
      Arc::clone(slot.arena.as_ref().expect("arena missing while referenced"));

    ArenaRef {
      arena,
      host: self.clone(),
    }
  }

  /// Whether the arena currently exists.
  #[must_use]
  pub fn is_live(&self) -> bool {
    self.slot.lock().arena.is_some()
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of outstanding references.
  #[must_use]
  pub fn references(&self) -> u32 {
    self.slot.lock().refcount
  }
}

/// Scoped handle keeping the shared arena alive.
///
/// Containers hold one as their allocator, so a table handed to an emitted
/// profile keeps the arena pinned until the profile itself is dropped. The
/// one-to-zero transition tears the arena down and must find no live
/// allocations.
pub struct ArenaRef {
  arena: Arc<Arena>,
  host: ArenaHost,
}

impl Clone for ArenaRef {
  fn clone(&self) -> Self {
    self.host.acquire()
  }
}

impl Drop for ArenaRef {
  fn drop(&mut self) {
    let mut slot = self.host.slot.lock();

    slot.refcount -= 1;

    if slot.refcount == 0 {
      let arena = slot.arena.take().expect("arena missing at teardown");

      assert_eq!(
        arena.live_allocations(),
        0,
        "arena torn down with live allocations"
      );
    }
  }
}

// SAFETY: blocks come from arena chunks that stay mapped until the last
// reference drops, and the live count keeps teardown honest.
unsafe impl Allocator for ArenaRef {
  fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
    self.arena.allocate(layout)
  }

  unsafe fn deallocate(&self, _ptr: NonNull<u8>, layout: Layout) {
    self.arena.deallocate(layout);
  }
}
