//! Pool topology validation
//!
//! Redundancy levels are a closed enum: each level knows its minimum device
//! count, its usable-capacity fraction, and the btrfs profiles it maps onto.
//! Validation happens before any destructive action and is never silently
//! downgraded to a weaker level.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Redundancy level of the storage pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyLevel {
    Single,
    Raid0,
    Raid1,
    Raid10,
}

impl RedundancyLevel {
    /// Minimum number of devices this level requires at creation time
    pub fn min_devices(self) -> usize {
        match self {
            RedundancyLevel::Single => 1,
            RedundancyLevel::Raid0 | RedundancyLevel::Raid1 => 2,
            RedundancyLevel::Raid10 => 4,
        }
    }

    /// Fraction of raw capacity usable for data
    pub fn usable_fraction(self) -> f64 {
        match self {
            RedundancyLevel::Single | RedundancyLevel::Raid0 => 1.0,
            RedundancyLevel::Raid1 | RedundancyLevel::Raid10 => 0.5,
        }
    }

    /// btrfs data profile for mkfs
    pub fn data_profile(self) -> &'static str {
        match self {
            RedundancyLevel::Single => "single",
            RedundancyLevel::Raid0 => "raid0",
            RedundancyLevel::Raid1 => "raid1",
            RedundancyLevel::Raid10 => "raid10",
        }
    }

    /// btrfs metadata profile: mirrored whenever more than one device exists
    pub fn metadata_profile(self) -> &'static str {
        match self {
            RedundancyLevel::Single => "dup",
            RedundancyLevel::Raid0 | RedundancyLevel::Raid1 => "raid1",
            RedundancyLevel::Raid10 => "raid10",
        }
    }
}

impl std::fmt::Display for RedundancyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.data_profile())
    }
}

impl FromStr for RedundancyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(RedundancyLevel::Single),
            "raid0" => Ok(RedundancyLevel::Raid0),
            "raid1" => Ok(RedundancyLevel::Raid1),
            "raid10" => Ok(RedundancyLevel::Raid10),
            other => Err(Error::UnknownRedundancyLevel(other.to_string())),
        }
    }
}

/// Confirm `device_count` is legal for `level`.
///
/// Returns the usable-capacity fraction on success so callers can estimate
/// pool capacity without a second match.
pub fn validate(level: RedundancyLevel, device_count: usize) -> Result<f64> {
    let minimum = level.min_devices();
    if device_count < minimum {
        return Err(Error::InvalidTopology {
            level: level.to_string(),
            device_count,
            minimum_required: minimum,
        });
    }
    Ok(level.usable_fraction())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_validate_succeeds_iff_enough_devices() {
        for level in [
            RedundancyLevel::Single,
            RedundancyLevel::Raid0,
            RedundancyLevel::Raid1,
            RedundancyLevel::Raid10,
        ] {
            let min = level.min_devices();
            for count in 0..min {
                assert!(validate(level, count).is_err(), "{level} with {count}");
            }
            for count in min..min + 3 {
                assert!(validate(level, count).is_ok(), "{level} with {count}");
            }
        }
    }

    #[test]
    fn test_raid10_boundary() {
        assert_matches!(
            validate(RedundancyLevel::Raid10, 3),
            Err(Error::InvalidTopology {
                device_count: 3,
                minimum_required: 4,
                ..
            })
        );
        assert_eq!(validate(RedundancyLevel::Raid10, 4).unwrap(), 0.5);
    }

    #[test]
    fn test_usable_fractions() {
        assert_eq!(validate(RedundancyLevel::Raid1, 2).unwrap(), 0.5);
        assert_eq!(validate(RedundancyLevel::Raid0, 2).unwrap(), 1.0);
        assert_eq!(validate(RedundancyLevel::Single, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_parse_is_closed() {
        assert_eq!(
            "RAID10".parse::<RedundancyLevel>().unwrap(),
            RedundancyLevel::Raid10
        );
        assert_eq!(
            "single".parse::<RedundancyLevel>().unwrap(),
            RedundancyLevel::Single
        );
        assert_matches!(
            "raid5".parse::<RedundancyLevel>(),
            Err(Error::UnknownRedundancyLevel(_))
        );
    }

    #[test]
    fn test_metadata_profile_mirrors_multi_device() {
        assert_eq!(RedundancyLevel::Single.metadata_profile(), "dup");
        assert_eq!(RedundancyLevel::Raid0.metadata_profile(), "raid1");
    }
}
