use {
  lifetimez::{AllocHandle, OsProbe, ProfilerRegistry, StackTrace, SysProbe},
  std::{thread, time::Duration},
};

fn main() {
  let registry = ProfilerRegistry::new();
  let mut profiler = registry.start_profile();

  registry.report_malloc(&StackTrace::new(
    AllocHandle(1),
    &[0x1000, 0x1040, 0x1100],
    48,
    8,
    64,
    256 * 1024,
    OsProbe.now(),
  ));

  thread::sleep(Duration::from_micros(250));
  registry.report_free(AllocHandle(1));

  let profile = profiler.stop();

  println!("=== demo lifetime profile ===");
  println!("duration: {:?}", profile.duration());
  for sample in profile.samples() {
    println!(
      "id={} count={} sum={}B lifetime={}ns cpu_matched={} frames={:x?}",
      sample.profile_id,
      sample.count,
      sample.sum,
      sample.lifetime_ns,
      sample.allocator_deallocator_cpu_matched,
      sample.frames()
    );
  }
}
