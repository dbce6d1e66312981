//! NitroFS serializer.
//!
//! ## Layout written
//! ```text
//! [base, 0x200 aligned]  FNT main table   (NumDirs × 8)
//! [immediately after]    FNT subtables    (padded so the FNT is 4-byte sized)
//! [0x200 aligned]        FAT              ((NumFiles + NumOverlays) × 8)
//! [0x200 aligned]        ARM9 OVT         (NumArm9 × 0x20, omitted if empty)
//! [0x200 aligned]        ARM7 OVT         (NumArm7 × 0x20, omitted if empty)
//! [0x200 aligned each]   File payloads    (overlays first, then the tree)
//! ```
//!
//! ## FNT main table entry (8 bytes)
//! ```text
//! [0x00] SubtableOffset - relative to the FNT start (u32 LE)
//! [0x04] FirstFileId                                (u16 LE)
//! [0x06] Root: total directory count; others: 0xF000 | ParentId (u16 LE)
//! ```
//!
//! ## Subtable records
//! ```text
//! file:       [u8 NameLen]        [Name]
//! directory:  [u8 NameLen | 0x80] [Name] [u16 LE 0xF000 | ChildId]
//! end:        [u8 0x00]
//! ```
//!
//! Payloads are streamed to the sink first; the tables are assembled in
//! memory and written once every payload position is known. Nothing is
//! written before validation succeeds.

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::source::FileSource;
use crate::utils::{align_up, checked_align_up, put_le_u16, put_le_u32, put_u8, zeros};
use crate::validate::{Plan, validate};
use crate::{
    ALIGNMENT, Arm, DIR_ENTRY_SIZE, DIR_REF_TAG, Error, FAT_ENTRY_SIZE, Info, Overlay, Result,
};

/// Region placement for one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub(crate) fnt_offset: u64,
    pub(crate) fnt_main_size: u64,
    pub(crate) fnt_size: u64,
    pub(crate) fat_offset: u64,
    pub(crate) fat_size: u64,
    pub(crate) ovt9_offset: u64,
    pub(crate) ovt9_size: u64,
    pub(crate) ovt7_offset: u64,
    pub(crate) ovt7_size: u64,
    /// First byte after the tables; payloads start at the next aligned position.
    pub(crate) data_start: u64,
}

/// Reserve `size` bytes at `head`. Empty regions get offset `0` and take no
/// space.
fn place(head: &mut u64, size: u64, align: bool) -> u64 {
    if size == 0 {
        return 0;
    }
    if align {
        *head = align_up(*head, ALIGNMENT);
    }
    let pos = *head;
    *head += size;
    pos
}

impl Layout {
    pub(crate) fn new(base: u64, plan: &Plan) -> Self {
        let mut head = base;
        let fnt_main_size = plan.num_directories() as u64 * DIR_ENTRY_SIZE as u64;
        let fnt_size = align_up(fnt_main_size + plan.subtable_len(), 4);
        let fnt_offset = place(&mut head, fnt_main_size, true);
        place(&mut head, fnt_size - fnt_main_size, false);

        let fat_size =
            (plan.num_files() + plan.num_overlay_files()) as u64 * FAT_ENTRY_SIZE as u64;
        let fat_offset = place(&mut head, fat_size, true);

        let ovt9_size = (plan.overlays(Arm::Arm9).len() * Overlay::SIZE) as u64;
        let ovt9_offset = place(&mut head, ovt9_size, true);
        let ovt7_size = (plan.overlays(Arm::Arm7).len() * Overlay::SIZE) as u64;
        let ovt7_offset = place(&mut head, ovt7_size, true);

        Self {
            fnt_offset,
            fnt_main_size,
            fnt_size,
            fat_offset,
            fat_size,
            ovt9_offset,
            ovt9_size,
            ovt7_offset,
            ovt7_size,
            data_start: head,
        }
    }

    /// End of the image once payloads of the given sizes are appended;
    /// `None` if that overflows `u64`.
    pub(crate) fn end(&self, mut sizes: impl Iterator<Item = u64>) -> Option<u64> {
        sizes.try_fold(self.data_start, |pos, size| {
            checked_align_up(pos, ALIGNMENT)?.checked_add(size)
        })
    }

    fn info(&self) -> Result<Info> {
        let c = |v: u64| u32::try_from(v).map_err(|_| Error::InvalidRange);
        Ok(Info {
            fnt_offset: c(self.fnt_offset)?,
            fnt_size: c(self.fnt_size)?,
            fat_offset: c(self.fat_offset)?,
            fat_size: c(self.fat_size)?,
            ovt9_offset: c(self.ovt9_offset)?,
            ovt9_size: c(self.ovt9_size)?,
            ovt7_offset: c(self.ovt7_offset)?,
            ovt7_size: c(self.ovt7_size)?,
        })
    }
}

/// Validate `src` and serialize it into `w`.
///
/// The tables start at the first 512-byte boundary at or after the sink's
/// current position. On success the sink is left positioned just past the
/// last payload, and the returned [`Info`] locates the tables.
///
/// If validation fails nothing is written. If writing fails (a source that
/// cannot be opened or read, or a sink error) the sink is rewound to the
/// position it had on entry and the error is returned; bytes at or after
/// that position are scratch and must not be used.
pub fn build<W, S>(w: &mut W, src: &S) -> Result<Info>
where
    W: Write + Seek,
    S: FileSource + ?Sized,
{
    let plan = validate(src)?;
    build_plan(w, src, &plan)
}

/// Serialize an already validated source.
///
/// `plan` must come from [`validate`] on the same `src`. Failure handling is
/// the same as for [`build`].
pub fn build_plan<W, S>(w: &mut W, src: &S, plan: &Plan) -> Result<Info>
where
    W: Write + Seek,
    S: FileSource + ?Sized,
{
    let start = w.stream_position()?;
    let base = align_up(start, ALIGNMENT);
    let layout = Layout::new(base, plan);
    if layout
        .end(plan.payload_sizes())
        .is_none_or(|end| end > u32::MAX as u64)
    {
        return Err(Error::InvalidRange);
    }
    let info = layout.info()?;
    debug!(base, ?info, "building NitroFS");

    let end = match write_image(w, src, plan, &layout, start) {
        Ok(end) => end,
        Err(err) => {
            if let Err(e) = w.seek(SeekFrom::Start(start)) {
                debug!(%e, "could not rewind sink");
            }
            debug!(start, %err, "build aborted");
            return Err(err);
        }
    };

    debug!(
        directories = plan.num_directories(),
        files = plan.num_files() + plan.num_overlay_files(),
        end,
        "built NitroFS"
    );
    Ok(info)
}

/// Stream every payload, then write the tables. Returns the end of the image.
fn write_image<W, S>(w: &mut W, src: &S, plan: &Plan, layout: &Layout, start: u64) -> Result<u64>
where
    W: Write + Seek,
    S: FileSource + ?Sized,
{
    let base = align_up(start, ALIGNMENT);
    let mut fat = Vec::with_capacity(layout.fat_size as usize);
    let mut ovt9 = Vec::with_capacity(layout.ovt9_size as usize);
    let mut ovt7 = Vec::with_capacity(layout.ovt7_size as usize);
    let mut fnt_main = Vec::with_capacity(layout.fnt_main_size as usize);
    let mut fnt_sub = Vec::with_capacity(plan.subtable_len() as usize);

    w.seek(SeekFrom::Start(layout.data_start))?;
    let mut payloads = Payloads {
        w: &mut *w,
        head: layout.data_start,
        fat: &mut fat,
        next_id: 0,
    };

    // Overlay files take the first FileIds, ARM9 then ARM7.
    for arm in Arm::BOTH {
        let table = match arm {
            Arm::Arm9 => &mut ovt9,
            Arm::Arm7 => &mut ovt7,
        };
        for (i, entry) in plan.overlays(arm).iter().enumerate() {
            let file_id = payloads.next_id;
            entry.overlay.assigned(file_id as u16).encode(table);
            let mut r = src.open_overlay(arm, i)?;
            payloads.write(&mut r)?;
            trace!(?arm, index = i, file_id, "wrote overlay");
        }
    }

    // Directories in ID order, which is the breadth-first dequeue order.
    let num_dirs = plan.num_directories();
    for (id, dir) in plan.dirs.iter().enumerate() {
        let subtable_offset = layout.fnt_main_size + fnt_sub.len() as u64;
        put_le_u32(&mut fnt_main, subtable_offset as u32);
        // Directories after the last of 0x10000 files have no valid first id.
        put_le_u16(
            &mut fnt_main,
            u16::try_from(payloads.next_id).unwrap_or(u16::MAX),
        );
        match dir.parent {
            None => put_le_u16(&mut fnt_main, num_dirs as u16),
            Some(parent) => put_le_u16(&mut fnt_main, DIR_REF_TAG | parent as u16),
        }

        for file in &dir.files {
            let mut r = src.open_file(&file.path)?;
            payloads.write(&mut r)?;
            put_u8(&mut fnt_sub, file.name.len() as u8);
            fnt_sub.extend_from_slice(file.name.as_bytes());
            trace!(path = %file.path, "wrote file");
        }

        for &child in &dir.subdirs {
            let name = &plan.dirs[child].name;
            put_u8(&mut fnt_sub, name.len() as u8 | 0x80);
            fnt_sub.extend_from_slice(name.as_bytes());
            put_le_u16(&mut fnt_sub, DIR_REF_TAG | child as u16);
        }

        put_u8(&mut fnt_sub, 0);
        trace!(id, path = %dir.path, "wrote directory");
    }

    let end = payloads.head;
    debug_assert_eq!(fnt_sub.len() as u64, plan.subtable_len());

    // Assemble the table region in one buffer, padding included.
    let mut tables = vec![0u8; (layout.data_start - base) as usize];
    let mut put = |offset: u64, bytes: &[u8]| {
        if !bytes.is_empty() {
            let at = (offset - base) as usize;
            tables[at..at + bytes.len()].copy_from_slice(bytes);
        }
    };
    put(layout.fnt_offset, &fnt_main);
    put(layout.fnt_offset + layout.fnt_main_size, &fnt_sub);
    put(layout.fat_offset, &fat);
    put(layout.ovt9_offset, &ovt9);
    put(layout.ovt7_offset, &ovt7);

    w.seek(SeekFrom::Start(start))?;
    zeros(w, base - start)?;
    w.write_all(&tables)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(end)
}


/// Payload writer: aligns, copies, and records allocation-table entries.
struct Payloads<'a, W> {
    w: &'a mut W,
    head: u64,
    fat: &'a mut Vec<u8>,
    next_id: u32,
}

impl<W: Write> Payloads<'_, W> {
    fn write(&mut self, r: &mut dyn Read) -> Result<()> {
        let start = align_up(self.head, ALIGNMENT);
        zeros(&mut *self.w, start - self.head)?;
        let n = io::copy(r, &mut *self.w)?;
        let end = start + n;

        let start32 = u32::try_from(start).map_err(|_| Error::InvalidRange)?;
        let end32 = u32::try_from(end).map_err(|_| Error::InvalidRange)?;
        put_le_u32(self.fat, start32);
        put_le_u32(self.fat, end32);

        self.head = end;
        self.next_id += 1;
        Ok(())
    }
}
