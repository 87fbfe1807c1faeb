//! Device identifier generation.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DeviceRange;

/// Width of the zero-padded numeric part of a device id.
pub const DEVICE_NUMBER_WIDTH: usize = 6;

/// Upper bound on the devices a single run may expand to.
pub const MAX_DEVICES: u64 = 10_000_000;

/// Identifier of one simulated device, e.g. `DEV000042`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(prefix: &str, number: u64) -> Self {
        Self(format!("{prefix}{number:0width$}", width = DEVICE_NUMBER_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expands every inclusive range, in configuration order.
///
/// Overlapping or repeated ranges are not deduplicated; each occurrence yields
/// its own device. A range whose start is past its end contributes nothing.
pub fn generate_ids(prefix: &str, ranges: &[DeviceRange]) -> Vec<DeviceId> {
    let capacity = total_devices(ranges).min(MAX_DEVICES);
    let mut ids = Vec::with_capacity(usize::try_from(capacity).unwrap_or(0));
    for range in ranges {
        ids.extend((range.start..=range.end).map(|n| DeviceId::new(prefix, n)));
    }
    ids
}

/// Number of ids a range expands to.
pub fn range_len(range: &DeviceRange) -> u64 {
    if range.start > range.end {
        0
    } else {
        (range.end - range.start).saturating_add(1)
    }
}

/// Ids expanded from all ranges, saturating at `u64::MAX`.
pub fn total_devices(ranges: &[DeviceRange]) -> u64 {
    ranges
        .iter()
        .map(range_len)
        .fold(0u64, |total, len| total.saturating_add(len))
}

/// Ids that appear more than once, each reported once.
pub fn duplicate_ids(ids: &[DeviceId]) -> Vec<&DeviceId> {
    ids.iter().duplicates().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn range(start: u64, end: u64) -> DeviceRange {
        DeviceRange { start, end }
    }

    #[test]
    fn test_single_range() {
        let ids = generate_ids("DEV", &[range(1, 3)]);
        let ids: Vec<&str> = ids.iter().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["DEV000001", "DEV000002", "DEV000003"]);
    }

    #[test]
    fn test_ranges_keep_config_order() {
        let ids = generate_ids("CPE", &[range(10, 11), range(1, 1)]);
        let ids: Vec<&str> = ids.iter().map(DeviceId::as_str).collect();
        assert_eq!(ids, vec!["CPE000010", "CPE000011", "CPE000001"]);
    }

    #[test]
    fn test_overlapping_ranges_are_not_deduplicated() {
        let ids = generate_ids("DEV", &[range(1, 3), range(2, 4)]);
        assert_eq!(ids.len(), 6);

        let dups: Vec<&str> = duplicate_ids(&ids).into_iter().map(DeviceId::as_str).collect();
        assert_eq!(dups, vec!["DEV000002", "DEV000003"]);
    }

    #[rstest]
    #[case(range(5, 4), 0)]
    #[case(range(7, 7), 1)]
    #[case(range(0, 9), 10)]
    fn test_range_len(#[case] r: DeviceRange, #[case] expected: u64) {
        assert_eq!(range_len(&r), expected);
        assert_eq!(generate_ids("X", &[r]).len() as u64, expected);
    }

    #[test]
    fn test_full_u64_range_does_not_overflow() {
        assert_eq!(range_len(&range(0, u64::MAX)), u64::MAX);
        assert_eq!(range_len(&range(u64::MAX, u64::MAX)), 1);
        assert_eq!(
            total_devices(&[range(0, u64::MAX), range(1, 5)]),
            u64::MAX
        );
    }

    #[test]
    fn test_wide_numbers_are_not_truncated() {
        assert_eq!(DeviceId::new("DEV", 1_234_567).as_str(), "DEV1234567");
    }

    proptest! {
        #[test]
        fn prop_length_and_shape(
            prefix in "[A-Z]{1,5}",
            raw in proptest::collection::vec((0u64..999_999, 0u64..200), 0..6),
        ) {
            let ranges: Vec<DeviceRange> = raw
                .iter()
                .map(|(start, len)| range(*start, (*start + *len).min(999_999)))
                .collect();
            let ids = generate_ids(&prefix, &ranges);

            let expected: u64 = ranges.iter().map(|r| r.end - r.start + 1).sum();
            prop_assert_eq!(ids.len() as u64, expected);

            for id in &ids {
                let digits = id.as_str().strip_prefix(prefix.as_str()).unwrap();
                prop_assert_eq!(digits.len(), DEVICE_NUMBER_WIDTH);
                prop_assert!(digits.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }
}
