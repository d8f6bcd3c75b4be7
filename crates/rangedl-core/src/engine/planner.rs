//! Byte-range planning for multi-segment downloads

use rangedl_types::SegmentSummary;

/// One contiguous byte range of the target, fetched independently.
///
/// `data` stays `None` until the worker assigned to `index` delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u32,
    /// First byte, inclusive
    pub from: u64,
    /// Last byte, inclusive
    pub to: u64,
    pub data: Option<Vec<u8>>,
}

impl Segment {
    pub fn new(index: u32, from: u64, to: u64) -> Self {
        Self {
            index,
            from,
            to,
            data: None,
        }
    }

    /// Number of bytes this range covers
    pub fn len(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Number of bytes actually received
    pub fn received(&self) -> u64 {
        self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
    }

    pub fn summary(&self) -> SegmentSummary {
        SegmentSummary {
            index: self.index,
            from: self.from,
            to: self.to,
            received: self.received(),
        }
    }
}

/// One worker per logical CPU, falling back to a single worker
pub fn default_worker_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Split `file_size` bytes into `worker_count` contiguous inclusive ranges.
///
/// With `each = file_size / worker_count`, every part but the last ends at
/// `from + each` and the last part ends at `file_size - 1`, so leading parts
/// span `each + 1` bytes. That layout only fits while the leading parts
/// leave the last one at least a byte; for tiny resources relative to the
/// worker count the bytes are instead spread as evenly as possible. Either
/// way the result has exactly `min(worker_count, file_size)` parts. An
/// empty resource yields no parts and a `worker_count` of zero counts as one.
pub fn plan_ranges(file_size: u64, worker_count: u32) -> Vec<(u64, u64)> {
    if file_size == 0 {
        return Vec::new();
    }

    let parts = u64::from(worker_count.max(1)).min(file_size);
    let each = file_size / parts;
    let mut ranges = Vec::with_capacity(parts as usize);

    if (parts - 1) * (each + 1) < file_size {
        for i in 0..parts {
            let from = match ranges.last() {
                Some(&(_, prev_to)) => prev_to + 1,
                None => 0,
            };
            let to = if i < parts - 1 { from + each } else { file_size - 1 };
            ranges.push((from, to));
        }
    } else {
        let remainder = file_size % parts;
        let mut from = 0;
        for i in 0..parts {
            let len = each + u64::from(i < remainder);
            ranges.push((from, from + len - 1));
            from += len;
        }
    }
    ranges
}

/// Plan ranges and wrap them as empty segments
pub fn plan_segments(file_size: u64, worker_count: u32) -> Vec<Segment> {
    plan_ranges(file_size, worker_count)
        .into_iter()
        .enumerate()
        .map(|(i, (from, to))| Segment::new(i as u32, from, to))
        .collect()
}
