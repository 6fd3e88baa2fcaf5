use super::*;

/// Errors that can occur when exporting a profile.
#[derive(Debug)]
pub enum ExportError {
  Encode(prost::EncodeError),
  Io(io::Error),
  Json(serde_json::Error),
}

impl Display for ExportError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(err) => write!(f, "i/o error during export: {err}"),
      Self::Json(err) => write!(f, "failed to encode profile as json: {err}"),
      Self::Encode(err) => {
        write!(f, "failed to encode profile as pprof: {err}")
      }
    }
  }
}

impl std::error::Error for ExportError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      Self::Json(err) => Some(err),
      Self::Encode(err) => Some(err),
    }
  }
}

impl From<io::Error> for ExportError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

impl From<serde_json::Error> for ExportError {
  fn from(value: serde_json::Error) -> Self {
    Self::Json(value)
  }
}

impl From<prost::EncodeError> for ExportError {
  fn from(value: prost::EncodeError) -> Self {
    Self::Encode(value)
  }
}

struct StringTable {
  entries: Vec<String>,
  index: HashMap<String, i64>,
}

impl StringTable {
  fn intern(&mut self, value: &str) -> i64 {
    if let Some(index) = self.index.get(value) {
      return *index;
    }

    let index = i64::try_from(self.entries.len()).unwrap_or(i64::MAX);

    self.entries.push(value.to_string());
    self.index.insert(value.to_string(), index);

    index
  }

  fn into_vec(self) -> Vec<String> {
    self.entries
  }

  fn new() -> Self {
    Self {
      entries: vec![String::new()],
      index: HashMap::from([(String::new(), 0)]),
    }
  }
}

fn num_label(key: i64, value: u64, unit: i64) -> pprof::Label {
  pprof::Label {
    key,
    num: i64::try_from(value).unwrap_or(i64::MAX),
    num_unit: unit,
    str: 0,
  }
}

fn str_label(key: i64, value: i64) -> pprof::Label {
  pprof::Label {
    key,
    num: 0,
    num_unit: 0,
    str: value,
  }
}

/// Expands an emitted profile into the pprof representation.
///
/// Stacks become address-only locations (symbolization is left to offline
/// tooling); the two sample values are the signed object count and the
/// weighted byte sum, and the bucketed lifetime statistics ride along as
/// labels.
pub fn build_pprof_profile(profile: &Profile) -> pprof::Profile {
  let mut string_table = StringTable::new();

  let mut locations = Vec::new();
  let mut location_ids = HashMap::new();
  let mut samples = Vec::new();

  let count_type = pprof::ValueType {
    ty: string_table.intern("objects"),
    unit: string_table.intern("count"),
  };

  let space_type = pprof::ValueType {
    ty: string_table.intern("space"),
    unit: string_table.intern("bytes"),
  };

  let nanoseconds = string_table.intern("nanoseconds");
  let lifetime_key = string_table.intern("lifetime_ns");
  let stddev_key = string_table.intern("stddev_lifetime_ns");
  let min_key = string_table.intern("min_lifetime_ns");
  let max_key = string_table.intern("max_lifetime_ns");
  let pair_key = string_table.intern("profile_id");
  let cpu_matched_key =
    string_table.intern("allocator_deallocator_cpu_matched");
  let thread_matched_key =
    string_table.intern("allocator_deallocator_thread_matched");
  let true_str = string_table.intern("true");
  let false_str = string_table.intern("false");

  let bool_str =
    |matched: bool| if matched { true_str } else { false_str };

  profile.iterate(|sample| {
    let mut location_id_list = Vec::with_capacity(sample.depth);

    for &address in sample.frames() {
      let next_id = locations.len() as u64 + 1;
      let location_id = *location_ids.entry(address).or_insert_with(|| {
        locations.push(pprof::Location {
          address: address as u64,
          id: next_id,
          is_folded: false,
          line: Vec::new(),
          mapping_id: 0,
        });

        next_id
      });

      location_id_list.push(location_id);
    }

    samples.push(pprof::Sample {
      label: vec![
        num_label(lifetime_key, sample.lifetime_ns, nanoseconds),
        num_label(stddev_key, sample.stddev_lifetime_ns, nanoseconds),
        num_label(min_key, sample.min_lifetime_ns, nanoseconds),
        num_label(max_key, sample.max_lifetime_ns, nanoseconds),
        num_label(pair_key, sample.profile_id, 0),
        str_label(
          cpu_matched_key,
          bool_str(sample.allocator_deallocator_cpu_matched),
        ),
        str_label(
          thread_matched_key,
          bool_str(sample.allocator_deallocator_thread_matched),
        ),
      ],
      location_id: location_id_list,
      value: vec![sample.count, sample.sum],
    });
  });

  pprof::Profile {
    comment: Vec::new(),
    default_sample_type: 0,
    drop_frames: 0,
    duration_nanos: i64::try_from(profile.duration().as_nanos())
      .unwrap_or(i64::MAX),
    function: Vec::new(),
    keep_frames: 0,
    location: locations,
    mapping: Vec::new(),
    period: 1,
    period_type: Some(pprof::ValueType { ty: 0, unit: 0 }),
    sample: samples,
    sample_type: vec![count_type, space_type],
    string_table: string_table.into_vec(),
    time_nanos: 0,
  }
}
