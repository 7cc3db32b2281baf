//! This module defines the canonical, type-safe representation of the retention
//! policy that can be attached to a persisted collection.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::tambakError;

/// Replication factors at or above this value are rejected.
const MAX_REPLICATION: u8 = 40;

/// Where, in which form, and how many times the blocks of a persisted
/// materialization are kept.
///
/// Instances are built either from one of the named constants or through
/// [`StorageLevel::new`], which rejects combinations the block store cannot honor.
/// Deserialization applies the same rules, with `NONE` as the only accepted
/// level that selects no storage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", try_from = "StorageLevelRepr")]
pub struct StorageLevel {
    use_disk: bool,
    use_memory: bool,
    use_off_heap: bool,
    deserialized: bool,
    replication: u8,
}

impl StorageLevel {
    /// Not persisted. This is the level reported for transient collections.
    pub const NONE: StorageLevel = StorageLevel::raw(false, false, false, false, 1);
    pub const DISK_ONLY: StorageLevel = StorageLevel::raw(true, false, false, false, 1);
    pub const DISK_ONLY_2: StorageLevel = StorageLevel::raw(true, false, false, false, 2);
    pub const DISK_ONLY_3: StorageLevel = StorageLevel::raw(true, false, false, false, 3);
    pub const MEMORY_ONLY: StorageLevel = StorageLevel::raw(false, true, false, true, 1);
    pub const MEMORY_ONLY_2: StorageLevel = StorageLevel::raw(false, true, false, true, 2);
    pub const MEMORY_ONLY_SER: StorageLevel = StorageLevel::raw(false, true, false, false, 1);
    pub const MEMORY_ONLY_SER_2: StorageLevel = StorageLevel::raw(false, true, false, false, 2);
    /// The level used by `cache()` and by `persist` when the caller has no preference.
    pub const MEMORY_AND_DISK: StorageLevel = StorageLevel::raw(true, true, false, true, 1);
    pub const MEMORY_AND_DISK_2: StorageLevel = StorageLevel::raw(true, true, false, true, 2);
    pub const MEMORY_AND_DISK_SER: StorageLevel = StorageLevel::raw(true, true, false, false, 1);
    pub const MEMORY_AND_DISK_SER_2: StorageLevel =
        StorageLevel::raw(true, true, false, false, 2);
    pub const OFF_HEAP: StorageLevel = StorageLevel::raw(true, true, true, false, 1);

    const fn raw(
        use_disk: bool,
        use_memory: bool,
        use_off_heap: bool,
        deserialized: bool,
        replication: u8,
    ) -> Self {
        Self {
            use_disk,
            use_memory,
            use_off_heap,
            deserialized,
            replication,
        }
    }

    /// Builds a custom level.
    ///
    /// Fails if no storage is selected, if an off-heap level asks for deserialized
    /// blocks, or if `replication` is outside `1..40`.
    pub fn new(
        use_disk: bool,
        use_memory: bool,
        use_off_heap: bool,
        deserialized: bool,
        replication: u8,
    ) -> Result<Self, tambakError> {
        let level = Self::raw(
            use_disk,
            use_memory,
            use_off_heap,
            deserialized,
            replication,
        );
        level.check()?;
        Ok(level)
    }

    fn check(&self) -> Result<(), tambakError> {
        if self.replication == 0 || self.replication >= MAX_REPLICATION {
            return Err(tambakError::InvalidArgument(format!(
                "replication must be within 1..{}, got {}",
                MAX_REPLICATION, self.replication
            )));
        }
        if self.use_off_heap && self.deserialized {
            return Err(tambakError::InvalidArgument(
                "off-heap storage levels must be serialized".to_string(),
            ));
        }
        if !self.use_disk && !self.use_memory && !self.use_off_heap {
            return Err(tambakError::InvalidArgument(
                "a storage level must use memory, disk or off-heap storage".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses one of the named constants, e.g. `"MEMORY_AND_DISK_SER"`. Case-insensitive.
    pub fn from_name(name: &str) -> Result<Self, tambakError> {
        let level = match name.trim().to_ascii_uppercase().as_str() {
            "NONE" => Self::NONE,
            "DISK_ONLY" => Self::DISK_ONLY,
            "DISK_ONLY_2" => Self::DISK_ONLY_2,
            "DISK_ONLY_3" => Self::DISK_ONLY_3,
            "MEMORY_ONLY" => Self::MEMORY_ONLY,
            "MEMORY_ONLY_2" => Self::MEMORY_ONLY_2,
            "MEMORY_ONLY_SER" => Self::MEMORY_ONLY_SER,
            "MEMORY_ONLY_SER_2" => Self::MEMORY_ONLY_SER_2,
            "MEMORY_AND_DISK" => Self::MEMORY_AND_DISK,
            "MEMORY_AND_DISK_2" => Self::MEMORY_AND_DISK_2,
            "MEMORY_AND_DISK_SER" => Self::MEMORY_AND_DISK_SER,
            "MEMORY_AND_DISK_SER_2" => Self::MEMORY_AND_DISK_SER_2,
            "OFF_HEAP" => Self::OFF_HEAP,
            other => {
                return Err(tambakError::InvalidArgument(format!(
                    "unknown storage level name '{}'",
                    other
                )))
            }
        };
        Ok(level)
    }

    pub fn use_disk(&self) -> bool {
        self.use_disk
    }

    pub fn use_memory(&self) -> bool {
        self.use_memory
    }

    pub fn use_off_heap(&self) -> bool {
        self.use_off_heap
    }

    pub fn deserialized(&self) -> bool {
        self.deserialized
    }

    pub fn replication(&self) -> u8 {
        self.replication
    }

    /// Returns `true` if blocks can be retained under this level: some storage is
    /// selected, replication is within `1..40` and off-heap blocks are serialized.
    pub fn is_valid(&self) -> bool {
        self.check().is_ok()
    }

    /// Human-readable summary, e.g. `"Disk Memory Deserialized 1x Replicated"`.
    pub fn description(&self) -> String {
        let mut result = String::new();
        if self.use_disk {
            result.push_str("Disk ");
        }
        if self.use_memory {
            result.push_str(if self.use_off_heap {
                "Memory (off heap) "
            } else {
                "Memory "
            });
        }
        result.push_str(if self.deserialized {
            "Deserialized "
        } else {
            "Serialized "
        });
        result.push_str(&format!("{}x Replicated", self.replication));
        result
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
struct StorageLevelRepr {
    use_disk: bool,
    use_memory: bool,
    use_off_heap: bool,
    deserialized: bool,
    replication: u8,
}

impl TryFrom<StorageLevelRepr> for StorageLevel {
    type Error = tambakError;

    fn try_from(repr: StorageLevelRepr) -> Result<Self, Self::Error> {
        let level = Self::raw(
            repr.use_disk,
            repr.use_memory,
            repr.use_off_heap,
            repr.deserialized,
            repr.replication,
        );
        if level == Self::NONE {
            return Ok(level);
        }
        level.check()?;
        Ok(level)
    }
}

impl Default for StorageLevel {
    fn default() -> Self {
        Self::MEMORY_AND_DISK
    }
}

impl fmt::Display for StorageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StorageLevel({}, {}, {}, {}, {})",
            if self.use_disk { "disk" } else { "-" },
            if self.use_memory { "memory" } else { "-" },
            if self.use_off_heap { "offheap" } else { "-" },
            if self.deserialized { "deserialized" } else { "serialized" },
            self.replication
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory_and_disk_single_replica() {
        let level = StorageLevel::default();
        assert_eq!(level, StorageLevel::MEMORY_AND_DISK);
        assert!(level.use_memory() && level.use_disk() && level.deserialized());
        assert_eq!(level.replication(), 1);
    }

    #[test]
    fn test_from_name_parses_constants_case_insensitively() {
        assert_eq!(
            StorageLevel::from_name("memory_and_disk_ser_2").unwrap(),
            StorageLevel::MEMORY_AND_DISK_SER_2
        );
        assert_eq!(
            StorageLevel::from_name(" DISK_ONLY ").unwrap(),
            StorageLevel::DISK_ONLY
        );
        assert!(matches!(
            StorageLevel::from_name("MEMORY_SOMETIMES"),
            Err(tambakError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_combinations() {
        assert!(StorageLevel::new(false, false, false, true, 1).is_err());
        assert!(StorageLevel::new(true, true, true, true, 1).is_err());
        assert!(StorageLevel::new(true, false, false, false, 0).is_err());
        assert!(StorageLevel::new(true, false, false, false, 40).is_err());

        let level = StorageLevel::new(false, true, false, false, 3).unwrap();
        assert_eq!(level.replication(), 3);
        assert!(!level.deserialized());
    }

    #[test]
    fn test_description_and_validity() {
        assert_eq!(
            StorageLevel::MEMORY_AND_DISK.description(),
            "Disk Memory Deserialized 1x Replicated"
        );
        assert_eq!(
            StorageLevel::OFF_HEAP.description(),
            "Disk Memory (off heap) Serialized 1x Replicated"
        );
        assert!(!StorageLevel::NONE.is_valid());
        assert!(StorageLevel::DISK_ONLY_3.is_valid());
    }

    #[test]
    fn test_serde_round_trip_keeps_fields() {
        let json = serde_json::to_string(&StorageLevel::MEMORY_ONLY_SER_2).unwrap();
        assert!(json.contains("\"replication\":2"));
        let back: StorageLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StorageLevel::MEMORY_ONLY_SER_2);

        let none = serde_json::to_string(&StorageLevel::NONE).unwrap();
        assert_eq!(serde_json::from_str::<StorageLevel>(&none).unwrap(), StorageLevel::NONE);
    }

    #[test]
    fn test_deserialization_and_validity_apply_construction_rules() {
        let excessive = r#"{"use_disk":true,"use_memory":false,"use_off_heap":false,"deserialized":false,"replication":200}"#;
        let off_heap_deserialized = r#"{"use_disk":true,"use_memory":true,"use_off_heap":true,"deserialized":true,"replication":1}"#;
        let nothing_deserialized = r#"{"use_disk":false,"use_memory":false,"use_off_heap":false,"deserialized":true,"replication":1}"#;

        for json in [excessive, off_heap_deserialized, nothing_deserialized] {
            let err = serde_json::from_str::<StorageLevel>(json).unwrap_err();
            assert!(err.is_data(), "{}", json);
        }

        assert!(!StorageLevel::raw(true, false, false, false, 200).is_valid());
        assert!(!StorageLevel::raw(true, true, true, true, 1).is_valid());
        assert!(!StorageLevel::raw(true, false, false, false, 0).is_valid());
        assert!(StorageLevel::OFF_HEAP.is_valid());
    }
}
