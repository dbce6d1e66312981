//! Byte-range map of a NitroFS image.
//!
//! Inspection tools use this to label every occupied range of a ROM: the
//! four tables, every named file and every overlay payload.

use std::fmt;

use crate::io::ReadAt;
use crate::reader::{FileId, NitroFs};
use crate::{Arm, Result};

/// What occupies a [`Region`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionKind {
    NameTable,
    AllocationTable,
    OverlayTable(Arm),
    /// A file reachable through the directory tree.
    File(String),
    /// A nameless overlay payload.
    OverlayFile(FileId),
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::NameTable => write!(f, "file name table"),
            RegionKind::AllocationTable => write!(f, "file allocation table"),
            RegionKind::OverlayTable(Arm::Arm9) => write!(f, "ARM9 overlay table"),
            RegionKind::OverlayTable(Arm::Arm7) => write!(f, "ARM7 overlay table"),
            RegionKind::File(path) => write!(f, "NitroFS file: {path}"),
            RegionKind::OverlayFile(id) => write!(f, "NitroFS file #{id:02}"),
        }
    }
}

/// One occupied byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub offset: u32,
    pub size: u32,
}

impl Region {
    /// First byte past the region.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    /// Whether two regions share at least one byte.
    pub fn overlaps(&self, other: &Region) -> bool {
        (self.offset as u64) < other.end() && (other.offset as u64) < self.end()
    }
}

impl<R: ReadAt> NitroFs<R> {
    /// Every non-empty region of the image, sorted by offset.
    pub fn regions(&self) -> Result<Vec<Region>> {
        let info = *self.info();
        let mut out = vec![
            Region {
                kind: RegionKind::NameTable,
                offset: info.fnt_offset,
                size: info.fnt_size,
            },
            Region {
                kind: RegionKind::AllocationTable,
                offset: info.fat_offset,
                size: info.fat_size,
            },
        ];
        for arm in Arm::BOTH {
            let (offset, size) = info.overlay_table(arm);
            out.push(Region {
                kind: RegionKind::OverlayTable(arm),
                offset,
                size,
            });
        }

        for (path, id) in self.walk()? {
            let (start, end) = self.file_range(id)?;
            out.push(Region {
                kind: RegionKind::File(path),
                offset: start,
                size: end - start,
            });
        }
        for arm in Arm::BOTH {
            for o in self.overlays(arm)? {
                out.push(Region {
                    kind: RegionKind::OverlayFile(o.overlay.file_id as FileId),
                    offset: o.start,
                    size: o.end.saturating_sub(o.start),
                });
            }
        }

        out.retain(|r| r.size != 0);
        out.sort_by_key(|r| r.offset);
        Ok(out)
    }
}
