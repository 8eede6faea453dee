use std::fmt::Display;

/// Declare an `i64` backed identifier.
///
/// Identifiers on the load path are assigned by the frontend, so unlike catalog ids they are
/// never allocated locally.
macro_rules! i64_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Default, Eq, PartialOrd, Ord, PartialEq, Hash)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(v: i64) -> Self {
                Self(v)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

i64_id!(
    /// A horizontal shard of a table, the unit of writer assignment.
    TabletId
);
i64_id!(
    /// A table partition. Every tablet belongs to exactly one partition.
    PartitionId
);
i64_id!(
    /// A materialized index of a table. One tablet channel is opened per index per load.
    IndexId
);
i64_id!(
    /// The transaction a load writes under.
    TxnId
);
i64_id!(
    /// A backend node.
    NodeId
);

/// The 128 bit identifier of a load job.
#[derive(Debug, Copy, Clone, Eq, PartialOrd, Ord, PartialEq, Hash, Default)]
pub struct LoadId {
    hi: i64,
    lo: i64,
}

impl LoadId {
    pub const fn new(hi: i64, lo: i64) -> Self {
        Self { hi, lo }
    }

    pub fn hi(&self) -> i64 {
        self.hi
    }

    pub fn lo(&self) -> i64 {
        self.lo
    }
}

impl Display for LoadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}-{:016x}", self.hi as u64, self.lo as u64)
    }
}
