//! [`DownloadRange`] and the [`RangePlanner`] that partitions a resource into them.

/// A contiguous, inclusive byte window `[from, to]` of the remote resource,
/// plus how much of it has already been committed to the sink.
///
/// Mutated only by the owning [`crate::fetcher::RangeFetcher`], and only
/// under the [`crate::sink::SinkWriter`] mutex; frozen once [`is_done`] is set.
///
/// [`is_done`]: DownloadRange::is_done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRange {
    pub from: u64,
    pub to: u64,
    /// Bytes already committed to the sink for this range, measured from `from`.
    /// Invariant: `0 <= current_offset <= width()`.
    pub current_offset: u64,
    pub is_done: bool,
}

impl DownloadRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            current_offset: 0,
            is_done: false,
        }
    }

    pub fn with_offset(from: u64, to: u64, current_offset: u64) -> Self {
        let width = to - from + 1;
        let is_done = current_offset == width;
        Self {
            from,
            to,
            current_offset,
            is_done,
        }
    }

    /// Total width of this range in bytes (`to - from + 1`).
    pub fn width(&self) -> u64 {
        self.to - self.from + 1
    }

    /// Absolute offset in the resource at which the next byte should be written.
    pub fn next_absolute_offset(&self) -> u64 {
        self.from + self.current_offset
    }

    pub fn remaining(&self) -> u64 {
        self.width() - self.current_offset
    }
}

/// Pure partitioning of `[0, total_size)` into [`DownloadRange`]s of at most
/// `part_size` bytes each.
pub struct RangePlanner;

impl RangePlanner {
    /// Builds ranges covering `[0, total_size)`.
    ///
    /// When `resuming_supported` is `false` the whole resource is a single
    /// range regardless of `part_size` — a server that can't serve byte
    /// ranges can't be split into concurrent parts. `total_size == 0`
    /// produces an empty plan (the download is immediately complete).
    pub fn plan(total_size: u64, part_size: u64, resuming_supported: bool) -> Vec<DownloadRange> {
        if total_size == 0 {
            return Vec::new();
        }

        if !resuming_supported {
            return vec![DownloadRange::new(0, total_size - 1)];
        }

        let mut ranges = Vec::new();
        let mut from = 0u64;
        while from < total_size {
            let to = (from + part_size).min(total_size) - 1;
            ranges.push(DownloadRange::new(from, to));
            from += part_size;
        }
        ranges
    }

    /// Validates a caller-supplied resume set against a newly discovered
    /// `total_size`. Returns `true` iff the ranges are contiguous, ordered,
    /// and their widths sum exactly to `total_size`.
    pub fn validate(ranges: &[DownloadRange], total_size: u64) -> bool {
        if ranges.is_empty() {
            return total_size == 0;
        }

        let mut expected_from = 0u64;
        for range in ranges {
            if range.from != expected_from || range.to < range.from {
                return false;
            }
            expected_from = range.to + 1;
        }

        expected_from == total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_three_ranges_for_s1() {
        let ranges = RangePlanner::plan(100_000, 40_000, true);
        assert_eq!(
            ranges,
            vec![
                DownloadRange::new(0, 39_999),
                DownloadRange::new(40_000, 79_999),
                DownloadRange::new(80_000, 99_999),
            ]
        );
    }

    #[test]
    fn single_range_when_resuming_unsupported() {
        let ranges = RangePlanner::plan(100_000, 40_000, false);
        assert_eq!(ranges, vec![DownloadRange::new(0, 99_999)]);
    }

    #[test]
    fn empty_plan_for_empty_resource() {
        assert!(RangePlanner::plan(0, 40_000, true).is_empty());
    }

    #[test]
    fn exact_multiple_of_part_size_has_no_trailing_empty_range() {
        let ranges = RangePlanner::plan(80_000, 40_000, true);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].to, 79_999);
    }

    #[test]
    fn coverage_is_contiguous_non_overlapping_and_ordered() {
        let ranges = RangePlanner::plan(987_654, 12_345, true);
        let total: u64 = ranges.iter().map(|r| r.width()).sum();
        assert_eq!(total, 987_654);

        let mut expected_from = 0;
        for range in &ranges {
            assert_eq!(range.from, expected_from);
            assert!(range.to >= range.from);
            expected_from = range.to + 1;
        }
    }

    #[test]
    fn validate_accepts_full_coverage() {
        let ranges = RangePlanner::plan(100_000, 40_000, true);
        assert!(RangePlanner::validate(&ranges, 100_000));
    }

    #[test]
    fn validate_rejects_mismatched_total() {
        let ranges = RangePlanner::plan(100_000, 40_000, true);
        assert!(!RangePlanner::validate(&ranges, 99_999));
    }

    #[test]
    fn validate_rejects_gap() {
        let ranges = vec![DownloadRange::new(0, 9), DownloadRange::new(20, 29)];
        assert!(!RangePlanner::validate(&ranges, 30));
    }

    #[test]
    fn with_offset_marks_done_when_fully_covered() {
        let range = DownloadRange::with_offset(0, 9, 10);
        assert!(range.is_done);
        assert_eq!(range.remaining(), 0);
    }
}
