//! Overlay descriptors.
//!
//! Overlays are loadable code/data modules stored as nameless files. They
//! never appear in the directory tree; each descriptor points at its file
//! through a FileId in the allocation table.
//!
//! ## Overlay Entry (0x20 bytes)
//! ```text
//! [0x00] OverlayId           (u32 LE)
//! [0x04] LoadAddress         (u32 LE)
//! [0x08] LoadSize            (u32 LE)
//! [0x0C] BssSize             (u32 LE)
//! [0x10] StaticInitStart     (u32 LE)
//! [0x14] StaticInitEnd       (u32 LE)
//! [0x18] FileId              (u32 LE)
//! [0x1C] Reserved            (u32 LE)
//! ```

use crate::utils::{get_le_u32, put_le_u32};

/// Which CPU an overlay table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm {
    Arm9,
    Arm7,
}

impl Arm {
    pub(crate) const BOTH: [Arm; 2] = [Arm::Arm9, Arm::Arm7];
}

/// One decoded overlay table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlay {
    pub id: u32,
    /// Address the overlay is loaded at.
    pub load_address: u32,
    /// Number of bytes loaded.
    pub load_size: u32,
    /// Size of the zero-initialized section following the loaded data.
    pub bss_size: u32,
    /// Start of the static initializer table.
    pub static_start: u32,
    /// End of the static initializer table.
    pub static_end: u32,
    /// FileId of the overlay's payload. Assigned by the builder.
    pub file_id: u32,
    pub reserved: u32,
}

impl Overlay {
    /// Encoded size in bytes.
    pub const SIZE: usize = 0x20;

    /// Decode one entry.
    pub fn decode(b: &[u8; Overlay::SIZE]) -> Self {
        Self {
            id: get_le_u32(b, 0x00),
            load_address: get_le_u32(b, 0x04),
            load_size: get_le_u32(b, 0x08),
            bss_size: get_le_u32(b, 0x0C),
            static_start: get_le_u32(b, 0x10),
            static_end: get_le_u32(b, 0x14),
            file_id: get_le_u32(b, 0x18),
            reserved: get_le_u32(b, 0x1C),
        }
    }

    /// Append the encoded entry to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        for v in [
            self.id,
            self.load_address,
            self.load_size,
            self.bss_size,
            self.static_start,
            self.static_end,
            self.file_id,
            self.reserved,
        ] {
            put_le_u32(buf, v);
        }
    }

    /// Copy of this descriptor pointing at `file_id`, with the reserved
    /// word cleared.
    ///
    /// The overlay id is kept as given rather than renumbered by table
    /// position, so descriptors read from an image are written back
    /// unchanged.
    pub(crate) fn assigned(&self, file_id: u16) -> Self {
        Self {
            file_id: file_id as u32,
            reserved: 0,
            ..*self
        }
    }
}

/// An overlay descriptor resolved through the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayFile {
    pub overlay: Overlay,
    /// Absolute start of the payload.
    pub start: u32,
    /// Absolute end of the payload (exclusive).
    pub end: u32,
}

impl OverlayFile {
    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets() {
        let ov = Overlay {
            id: 1,
            load_address: 0x0200_0000,
            load_size: 0x1234,
            bss_size: 0x40,
            static_start: 0x0200_1000,
            static_end: 0x0200_1008,
            file_id: 7,
            reserved: 0,
        };
        let mut buf = Vec::new();
        ov.encode(&mut buf);
        assert_eq!(buf.len(), Overlay::SIZE);
        assert_eq!(&buf[0x04..0x08], &[0x00, 0x00, 0x00, 0x02]);
        assert_eq!(&buf[0x18..0x1C], &[7, 0, 0, 0]);

        let arr: [u8; Overlay::SIZE] = buf.try_into().unwrap();
        assert_eq!(Overlay::decode(&arr), ov);
    }

    #[test]
    fn assigned_overrides_file_id_and_reserved() {
        let ov = Overlay {
            id: 3,
            file_id: 99,
            reserved: 0xFFFF_FFFF,
            ..Default::default()
        };
        let a = ov.assigned(2);
        assert_eq!(a.id, 3);
        assert_eq!(a.file_id, 2);
        assert_eq!(a.reserved, 0);
    }
}
