//! Deallocation lifetime profiler embedded in a sampling allocator.
//!
//! The host allocator reports each sampled allocation and the matching
//! deallocation; active profilers pair the two events, aggregate lifetime
//! statistics per (allocation stack, deallocation stack), and emit a profile
//! of signed sample pairs for offline tooling.

mod arena;
mod bucket;
mod config;
mod event;
mod export;
pub mod pprof;
mod profile;
mod profiler;
mod record;
mod registry;
mod sys;
mod table;

use std::{
  collections::HashMap,
  fmt::{self, Display, Formatter},
  io,
};

pub use {
  arena::{ArenaHost, ArenaRef},
  bucket::bucketize_ns,
  config::ProfilerConfig,
  event::{AllocHandle, STACK_INLINE_DEPTH, StackTrace},
  export::{ExportError, build_pprof_profile},
  profile::{Profile, ProfileType, Sample},
  profiler::ProfilerHandle,
  record::{MAX_STACK_DEPTH, SampleRecord},
  registry::ProfilerRegistry,
  sys::{OsProbe, SysProbe, Timestamp},
};
