//! Table locator shared by the builder and the reader.
//!
//! ## Layout (0x20 bytes, as stored in a DS ROM header at 0x40)
//! ```text
//! [0x00] FNT offset        (u32 LE)
//! [0x04] FNT size          (u32 LE)
//! [0x08] FAT offset        (u32 LE)
//! [0x0C] FAT size          (u32 LE)
//! [0x10] ARM9 OVT offset   (u32 LE)
//! [0x14] ARM9 OVT size     (u32 LE)
//! [0x18] ARM7 OVT offset   (u32 LE)
//! [0x1C] ARM7 OVT size     (u32 LE)
//! ```
//!
//! Offsets are absolute within the containing image. An empty overlay table
//! has offset and size `0`.

use std::io::{Read, Write};

use crate::utils::le_u32;
use crate::{Arm, Result};

/// Offsets and sizes of the four NitroFS tables.
///
/// This is the only state a host format needs to persist to reopen the
/// filesystem later.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Info {
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub ovt9_offset: u32,
    pub ovt9_size: u32,
    pub ovt7_offset: u32,
    pub ovt7_size: u32,
}

impl Info {
    /// Encoded size in bytes.
    pub const SIZE: usize = 0x20;

    /// Where a DS ROM header stores this block.
    pub const HEADER_OFFSET: u64 = 0x40;

    /// Parse the 32-byte block from `r`.
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            fnt_offset: le_u32(r)?,
            fnt_size: le_u32(r)?,
            fat_offset: le_u32(r)?,
            fat_size: le_u32(r)?,
            ovt9_offset: le_u32(r)?,
            ovt9_size: le_u32(r)?,
            ovt7_offset: le_u32(r)?,
            ovt7_size: le_u32(r)?,
        })
    }

    /// Write the 32-byte block to `w`.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let fields = [
            self.fnt_offset,
            self.fnt_size,
            self.fat_offset,
            self.fat_size,
            self.ovt9_offset,
            self.ovt9_size,
            self.ovt7_offset,
            self.ovt7_size,
        ];
        for v in fields {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// Number of entries in the allocation table.
    pub fn file_count(&self) -> u32 {
        self.fat_size / crate::FAT_ENTRY_SIZE
    }

    /// Offset and size of the overlay table for `arm`.
    pub fn overlay_table(&self, arm: Arm) -> (u32, u32) {
        match arm {
            Arm::Arm9 => (self.ovt9_offset, self.ovt9_size),
            Arm::Arm7 => (self.ovt7_offset, self.ovt7_size),
        }
    }
}
