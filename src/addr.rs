//! Typed logical/physical addresses and deltas (component B).
//!
//! Three newtypes over `i64` keep address-space arithmetic from being
//! accidentally mixed: a `LogicalAddr` can't be compared to a
//! `PhysicalAddr`, and only a `AddrDelta` can be added to either.

use std::fmt;
use std::ops::{Add, Sub};

macro_rules! addr_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(v: i64) -> Self {
                Self(v)
            }

            pub const fn as_i64(self) -> i64 {
                self.0
            }

            pub const fn as_u64(self) -> u64 {
                self.0 as u64
            }

            pub fn add(self, delta: AddrDelta) -> Self {
                Self(self.0 + delta.0)
            }

            pub fn sub(self, other: Self) -> AddrDelta {
                AddrDelta(self.0 - other.0)
            }

            pub fn checked_add_len(self, len: u64) -> Option<Self> {
                i64::try_from(len).ok().and_then(|l| self.0.checked_add(l)).map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v as i64)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        /// Default / `{:v}` / `{:s}` form: zero-padded 16 hex digits.
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0 as u64)
            }
        }

        /// `{:x}` acts as on the underlying integer (no padding).
        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl Add<AddrDelta> for $name {
            type Output = $name;
            fn add(self, rhs: AddrDelta) -> $name {
                $name::add(self, rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = AddrDelta;
            fn sub(self, rhs: $name) -> AddrDelta {
                $name::sub(self, rhs)
            }
        }
    };
}

addr_type!(PhysicalAddr);
addr_type!(LogicalAddr);

/// A signed delta between two addresses of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddrDelta(pub i64);

impl AddrDelta {
    pub const fn new(v: i64) -> Self {
        Self(v)
    }
}

impl fmt::Display for AddrDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}

/// A device identifier assigned by the caller when registering a backing
/// image with the volume mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A qualified physical address: which device, and where on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedPhysical {
    pub device: DeviceId,
    pub addr: PhysicalAddr,
}

impl QualifiedPhysical {
    pub fn new(device: DeviceId, addr: PhysicalAddr) -> Self {
        Self { device, addr }
    }
}

impl fmt::Display for QualifiedPhysical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.addr)
    }
}
