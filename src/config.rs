//! Store configuration, validated once at `Store::open`.

use crate::error::{Error, Result};
use crate::record::HEADER_LEN;

/// Options consumed at `open`. Defaults match the core specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Fsync every write immediately. Overrides `fsync_on_append` when true.
    pub sync: bool,
    /// Period, in seconds, of the background fsync task. `0` disables it.
    pub fsync_interval_s: u64,
    /// Fsync the active segment's log after every single append.
    pub fsync_on_append: bool,
    /// Hard upper bound on a segment's `.log` size, in bytes.
    pub max_segment_size: u64,
    /// Hard upper bound on the number of records a segment may hold.
    pub max_entries_per_segment: u64,
    /// Hard upper bound on key length, in bytes.
    pub max_key_size: u32,
    /// Hard upper bound on value length, in bytes.
    pub max_value_size: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sync: false,
            fsync_interval_s: 5,
            fsync_on_append: false,
            max_segment_size: 10 * 1024 * 1024,
            max_entries_per_segment: 1000,
            max_key_size: 1024,
            max_value_size: 1024 * 1024,
        }
    }
}

impl Options {
    /// Validates the combination of options, failing with `InvalidConfig`
    /// if a record built at the configured maximums could never fit in a
    /// freshly created segment.
    pub fn validate(&self) -> Result<()> {
        if self.max_key_size == 0 {
            return Err(Error::InvalidConfig("max_key_size must be at least 1".into()));
        }
        if self.max_entries_per_segment == 0 {
            return Err(Error::InvalidConfig("max_entries_per_segment must be at least 1".into()));
        }
        if self.max_segment_size == 0 {
            return Err(Error::InvalidConfig("max_segment_size must be at least 1".into()));
        }
        let max_record = HEADER_LEN as u64 + self.max_key_size as u64 + self.max_value_size as u64;
        if max_record > self.max_segment_size {
            return Err(Error::InvalidConfig(format!(
                "a maximal record ({max_record} bytes) would not fit in max_segment_size ({} bytes)",
                self.max_segment_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn defaults_are_valid() {
        Options::default().validate().expect("defaults must validate");
    }

    #[test_case(0, 1024, 1024 * 1024, 10 * 1024 * 1024 => false; "zero max_key_size")]
    #[test_case(1024, 0, 1024 * 1024, 10 * 1024 * 1024 => false; "zero max_entries_per_segment")]
    #[test_case(1024, 1000, 1024 * 1024, 1024 => false; "record larger than segment")]
    #[test_case(1024, 1000, 1024 * 1024, 10 * 1024 * 1024 => true; "defaults-shaped values are valid")]
    fn validate_combinations(max_key: u32, max_entries: u64, max_value: u32, max_segment: u64) -> bool {
        let opts = Options {
            max_key_size: max_key,
            max_entries_per_segment: max_entries,
            max_value_size: max_value,
            max_segment_size: max_segment,
            ..Options::default()
        };
        opts.validate().is_ok()
    }
}
