//! CHERI capability snapshots
//!
//! A [`CheriCap`] is a copy of the architectural fields of a capability
//! register at the moment a trace event produced it, plus the allocation
//! and free times assigned by the provenance pass.
//!
//! # Capability Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        CheriCap                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  base, length, offset    - address geometry              │
//! │  permissions: CapPerm    - hardware permission bits      │
//! │  object_type: u24        - sealing object type           │
//! │  valid, sealed           - tag and seal state            │
//! │  t_alloc, t_free         - cycle counts, -1 when unset   │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CapmapError, Result};
use crate::range::{Range, RangeKind};
use crate::trace::{CapRegister, Operand};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mask of the 24-bit object type field
pub const OBJECT_TYPE_MASK: u32 = 0x00FF_FFFF;

bitflags! {
    /// Capability permission bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CapPerm: u32 {
        const GLOBAL = 1;
        const EXEC = 1 << 1;
        const LOAD = 1 << 2;
        const STORE = 1 << 3;
        const CAP_LOAD = 1 << 4;
        const CAP_STORE = 1 << 5;
        const CAP_STORE_LOCAL = 1 << 6;
        const SEAL = 1 << 7;
        const INVOKE = 1 << 8;
        const UNSEAL = 1 << 9;
        const SYSTEM_REGISTERS = 1 << 10;
    }
}

impl CapPerm {
    /// The load/store/execute subset used to classify address-map lines
    pub fn rwx(self) -> CapPerm {
        self & (CapPerm::LOAD | CapPerm::STORE | CapPerm::EXEC)
    }
}

/// Snapshot of a CHERI capability register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheriCap {
    pub base: u64,
    pub length: u64,
    pub offset: u64,
    pub permissions: CapPerm,
    pub object_type: u32,
    pub valid: bool,
    pub sealed: bool,
    /// Allocation cycle, -1 if unset
    pub t_alloc: i64,
    /// Free cycle, -1 while the capability is live
    pub t_free: i64,
}

impl Default for CheriCap {
    fn default() -> Self {
        Self {
            base: 0,
            length: 0,
            offset: 0,
            permissions: CapPerm::empty(),
            object_type: 0,
            valid: false,
            sealed: false,
            t_alloc: -1,
            t_free: -1,
        }
    }
}

impl From<&CapRegister> for CheriCap {
    fn from(reg: &CapRegister) -> Self {
        Self {
            base: reg.base,
            length: reg.length,
            offset: reg.offset,
            permissions: CapPerm::from_bits_retain(reg.permissions),
            object_type: reg.object_type & OBJECT_TYPE_MASK,
            valid: reg.valid,
            sealed: reg.sealed,
            ..Self::default()
        }
    }
}

impl CheriCap {
    /// Copy the capability fields out of a trace operand
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperand` if the operand is not a capability register.
    pub fn from_register(operand: &Operand) -> Result<Self> {
        match operand.capability() {
            Some(reg) => Ok(Self::from(reg)),
            None => Err(CapmapError::InvalidOperand(operand.to_string())),
        }
    }

    /// End of the capability, `(base + length) mod 2^64`
    pub fn bound(&self) -> u64 {
        self.base.wrapping_add(self.length)
    }

    /// A capability whose bound wrapped below its base
    pub fn is_overflowed(&self) -> bool {
        self.bound() < self.base
    }

    /// The capability span as a KEEP range
    ///
    /// # Errors
    ///
    /// Returns `OverflowedCapability` when `bound < base`.
    pub fn checked_range(&self) -> Result<Range> {
        let bound = self.bound();
        if bound < self.base {
            return Err(CapmapError::OverflowedCapability {
                base: self.base,
                bound,
            });
        }
        Ok(Range::new(self.base, bound, RangeKind::Keep))
    }

    pub fn has_perm(&self, perm: CapPerm) -> bool {
        self.permissions.contains(perm)
    }

    /// Space separated names of the set permission bits, or `None`
    pub fn perm_string(&self) -> String {
        let names: Vec<&str> = self.permissions.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            "None".to_string()
        } else {
            names.join(" ")
        }
    }

    pub fn is_live(&self) -> bool {
        self.t_free < 0
    }
}

impl fmt::Display for CheriCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[b:{:x} o:{:x} l:{:x} p:({}) t:{:x} v:{} s:{}] t_alloc:{} t_free:{}",
            self.base,
            self.offset,
            self.length,
            self.perm_string(),
            self.object_type,
            self.valid,
            self.sealed,
            self.t_alloc,
            self.t_free
        )
    }
}
