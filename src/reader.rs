//! Lazy NitroFS decoder.
//!
//! [`NitroFs`] holds nothing but a positioned source and an [`Info`]. Every
//! operation decodes the table region it needs on demand, and every error
//! is returned from the call that ran into it.
//!
//! Directory listings are cursor based: [`NitroFs::list`] decodes at most
//! `n` records and returns a [`ListCursor`] to resume from. A listing
//! always ends at the subtable terminator, and the subtable is bounded by
//! the FNT size, so a listing is finite even on a corrupt image.

use std::collections::{HashSet, VecDeque};
use std::io::{BufReader, Read};

use tracing::trace;

use crate::io::{FileReader, ReadAt};
use crate::source::{EntryKind, FileSource, SourceEntry, SourceOverlay, join, segments};
use crate::utils::{bytesa, bytesv, le_u16, u8};
use crate::{
    Arm, DIR_ENTRY_SIZE, DIR_REF_MASK, Error, FAT_ENTRY_SIZE, Info, Overlay, OverlayFile, Result,
};

/// Directory ID. `0` is always the root.
pub type DirId = u16;

/// File ID: index into the allocation table.
pub type FileId = u16;

/// The root directory.
pub const ROOT: DirId = 0;

/// One FNT main-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirTableEntry {
    /// Subtable offset, relative to the FNT start.
    pub subtable_offset: u32,
    /// FileId of the first file record in the subtable.
    pub first_file: FileId,
    /// Total directory count for the root, tagged parent ID otherwise.
    pub parent_or_count: u16,
}

impl DirTableEntry {
    fn decode(b: &[u8; 8]) -> Self {
        Self {
            subtable_offset: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            first_file: u16::from_le_bytes([b[4], b[5]]),
            parent_or_count: u16::from_le_bytes([b[6], b[7]]),
        }
    }
}

/// A decoded subtable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DirEntry {
    File { name: String, id: FileId },
    Dir { name: String, id: DirId },
}

impl DirEntry {
    pub fn name(&self) -> &str {
        match self {
            DirEntry::File { name, .. } | DirEntry::Dir { name, .. } => name,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            DirEntry::File { .. } => EntryKind::File,
            DirEntry::Dir { .. } => EntryKind::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DirEntry::Dir { .. })
    }
}

/// Resume point for [`NitroFs::list`].
///
/// Carries the byte offset into the subtable and the FileId the next file
/// record will receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListCursor {
    offset: u32,
    next_file: FileId,
}

impl ListCursor {
    /// Start of a directory listing.
    pub const START: Self = Self {
        offset: 0,
        next_file: 0,
    };

    /// Byte offset into the directory's subtable.
    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<DirEntry>,
    /// Where to resume.
    pub cursor: ListCursor,
    /// The terminator was reached; further calls return nothing.
    pub done: bool,
}

/// Size and kind of a file or directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: EntryKind,
    /// Payload size in bytes; `0` for directories.
    pub size: u64,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Unix-style mode: everything is read-only (`0o555`), directories carry
    /// `S_IFDIR`.
    pub fn mode(&self) -> u32 {
        match self.kind {
            EntryKind::Dir => 0o040_555,
            EntryKind::File => 0o555,
        }
    }
}

/// Result of [`NitroFs::open`].
#[derive(Debug)]
pub enum Handle<'a, R> {
    File(FileHandle<'a, R>),
    Dir(DirHandle<'a, R>),
}

impl<'a, R: ReadAt> Handle<'a, R> {
    pub fn metadata(&self) -> Result<Metadata> {
        match self {
            Handle::File(f) => f.metadata(),
            Handle::Dir(d) => Ok(d.metadata()),
        }
    }

    pub fn into_file(self) -> Option<FileHandle<'a, R>> {
        match self {
            Handle::File(f) => Some(f),
            Handle::Dir(_) => None,
        }
    }

    pub fn into_dir(self) -> Option<DirHandle<'a, R>> {
        match self {
            Handle::Dir(d) => Some(d),
            Handle::File(_) => None,
        }
    }
}

/// An opened file: stat and read.
#[derive(Debug)]
pub struct FileHandle<'a, R> {
    fs: &'a NitroFs<R>,
    id: FileId,
}

impl<'a, R: ReadAt> FileHandle<'a, R> {
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn metadata(&self) -> Result<Metadata> {
        self.fs.stat(self.id)
    }

    /// Bounded reader over the file's contents.
    pub fn reader(&self) -> Result<FileReader<'a, R>> {
        self.fs.read_file(self.id)
    }

    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        self.fs.read_to_vec(self.id)
    }
}

/// An opened directory: stat and incremental listing.
#[derive(Debug)]
pub struct DirHandle<'a, R> {
    fs: &'a NitroFs<R>,
    id: DirId,
    cursor: ListCursor,
    done: bool,
}

impl<R: ReadAt> DirHandle<'_, R> {
    pub fn id(&self) -> DirId {
        self.id
    }

    pub fn metadata(&self) -> Metadata {
        Metadata {
            kind: EntryKind::Dir,
            size: 0,
        }
    }

    /// Next `n` entries (all remaining if `n == 0`). Returns an empty list
    /// once the directory is exhausted.
    pub fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        if self.done {
            return Ok(Vec::new());
        }
        let page = self.fs.list(self.id, self.cursor, n)?;
        self.cursor = page.cursor;
        self.done = page.done;
        Ok(page.entries)
    }

    /// Every entry, from the start regardless of the handle's position.
    pub fn entries(&self) -> Result<Vec<DirEntry>> {
        self.fs.read_dir(self.id)
    }
}

/// A NitroFS image opened for reading.
///
/// `R` is any [`ReadAt`] source; wrap plain `Read + Seek` sources in
/// [`crate::io::Locked`]. All methods take `&self`, so one `NitroFs` can
/// serve several threads when `R: Sync`.
#[derive(Debug)]
pub struct NitroFs<R> {
    src: R,
    info: Info,
}

impl<R: ReadAt> NitroFs<R> {
    pub fn new(src: R, info: Info) -> Self {
        Self { src, info }
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn get_ref(&self) -> &R {
        &self.src
    }

    /// Consume the filesystem, returning the source.
    pub fn into_inner(self) -> R {
        self.src
    }

    /// Decode the main-table entry for `dir`.
    pub fn dir_entry(&self, dir: DirId) -> Result<DirTableEntry> {
        if dir != ROOT && dir >= self.num_directories()? {
            return Err(Error::InvalidRange);
        }
        self.read_dir_entry(dir)
    }

    fn read_dir_entry(&self, dir: DirId) -> Result<DirTableEntry> {
        let at = dir as u64 * DIR_ENTRY_SIZE as u64;
        if at + DIR_ENTRY_SIZE as u64 > self.info.fnt_size as u64 {
            return Err(Error::InvalidRange);
        }
        let mut b = [0u8; 8];
        self.src
            .read_exact_at(self.info.fnt_offset as u64 + at, &mut b)?;
        Ok(DirTableEntry::decode(&b))
    }

    /// Directory count, as recorded in the root entry.
    pub fn num_directories(&self) -> Result<u16> {
        Ok(self.read_dir_entry(ROOT)?.parent_or_count)
    }

    /// Parent of `dir`; `None` for the root.
    pub fn parent(&self, dir: DirId) -> Result<Option<DirId>> {
        if dir == ROOT {
            return Ok(None);
        }
        Ok(Some(self.dir_entry(dir)?.parent_or_count & DIR_REF_MASK))
    }

    /// Decode up to `n` records of `dir` starting at `cursor` (`n == 0`
    /// reads to the terminator).
    pub fn list(&self, dir: DirId, cursor: ListCursor, n: usize) -> Result<Listing> {
        let entry = self.dir_entry(dir)?;
        let fnt_end = self.info.fnt_offset as u64 + self.info.fnt_size as u64;
        let sub_base = self.info.fnt_offset as u64 + entry.subtable_offset as u64;
        let from = sub_base + cursor.offset as u64;
        if from >= fnt_end {
            return Err(Error::InvalidRange);
        }

        let mut offset = cursor.offset;
        let mut next_file = if cursor.offset == 0 {
            entry.first_file
        } else {
            cursor.next_file
        };
        let mut r = BufReader::with_capacity(256, FileReader::new(&self.src, from, fnt_end));
        let mut entries = Vec::new();
        let mut done = false;

        while n == 0 || entries.len() < n {
            let len = u8(&mut r)?;
            // A zero-length directory record also ends the table.
            if len == 0 || len == 0x80 {
                done = true;
                break;
            }
            let name_len = (len & 0x7F) as usize;
            let name = String::from_utf8_lossy(&bytesv(&mut r, name_len)?).into_owned();
            offset += 1 + name_len as u32;

            if len & 0x80 != 0 {
                let id = le_u16(&mut r)? & DIR_REF_MASK;
                offset += 2;
                trace!(dir, %name, id, "dir record");
                entries.push(DirEntry::Dir { name, id });
            } else {
                trace!(dir, %name, id = next_file, "file record");
                entries.push(DirEntry::File {
                    name,
                    id: next_file,
                });
                next_file = next_file.wrapping_add(1);
            }
        }

        Ok(Listing {
            entries,
            cursor: ListCursor { offset, next_file },
            done,
        })
    }

    /// Every entry of `dir`.
    pub fn read_dir(&self, dir: DirId) -> Result<Vec<DirEntry>> {
        Ok(self.list(dir, ListCursor::START, 0)?.entries)
    }

    /// Find `name` among the children of `dir`.
    pub fn lookup(&self, dir: DirId, name: &str) -> Result<Option<DirEntry>> {
        let mut cursor = ListCursor::START;
        loop {
            let page = self.list(dir, cursor, 32)?;
            if let Some(found) = page.entries.into_iter().find(|e| e.name() == name) {
                return Ok(Some(found));
            }
            if page.done {
                return Ok(None);
            }
            cursor = page.cursor;
        }
    }

    /// Open a slash-separated path. `"."` is the root.
    pub fn open(&self, path: &str) -> Result<Handle<'_, R>> {
        let mut current = DirEntry::Dir {
            name: String::new(),
            id: ROOT,
        };
        for (i, seg) in segments(path)?.into_iter().enumerate() {
            let DirEntry::Dir { id, .. } = current else {
                let prefix = path.split('/').take(i).collect::<Vec<_>>().join("/");
                return Err(Error::NotADirectory(prefix));
            };
            current = self
                .lookup(id, seg)?
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
        }
        Ok(match current {
            DirEntry::File { id, .. } => Handle::File(FileHandle { fs: self, id }),
            DirEntry::Dir { id, .. } => Handle::Dir(DirHandle {
                fs: self,
                id,
                cursor: ListCursor::START,
                done: false,
            }),
        })
    }

    /// Absolute `[start, end)` of a file.
    pub fn file_range(&self, file: FileId) -> Result<(u32, u32)> {
        let at = file as u64 * FAT_ENTRY_SIZE as u64;
        if at + FAT_ENTRY_SIZE as u64 > self.info.fat_size as u64 {
            return Err(Error::InvalidRange);
        }
        let mut b = [0u8; 8];
        self.src
            .read_exact_at(self.info.fat_offset as u64 + at, &mut b)?;
        let start = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let end = u32::from_le_bytes([b[4], b[5], b[6], b[7]]);
        if end < start {
            return Err(Error::InvalidRange);
        }
        Ok((start, end))
    }

    pub fn stat(&self, file: FileId) -> Result<Metadata> {
        let (start, end) = self.file_range(file)?;
        Ok(Metadata {
            kind: EntryKind::File,
            size: (end - start) as u64,
        })
    }

    /// Bounded reader over a file's contents.
    pub fn read_file(&self, file: FileId) -> Result<FileReader<'_, R>> {
        let (start, end) = self.file_range(file)?;
        Ok(FileReader::new(&self.src, start as u64, end as u64))
    }

    /// Read a whole file into memory.
    pub fn read_to_vec(&self, file: FileId) -> Result<Vec<u8>> {
        let (start, end) = self.file_range(file)?;
        let mut buf = vec![0u8; (end - start) as usize];
        self.src.read_exact_at(start as u64, &mut buf)?;
        Ok(buf)
    }

    /// Decode the overlay table for `arm` and resolve each payload.
    pub fn overlays(&self, arm: Arm) -> Result<Vec<OverlayFile>> {
        let (offset, size) = self.info.overlay_table(arm);
        let count = size as usize / Overlay::SIZE;
        let table_len = (count * Overlay::SIZE) as u64;
        let mut r = FileReader::new(&self.src, offset as u64, offset as u64 + table_len);

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let overlay = Overlay::decode(&bytesa::<{ Overlay::SIZE }>(&mut r)?);
            let file_id = FileId::try_from(overlay.file_id).map_err(|_| Error::InvalidRange)?;
            let (start, end) = self.file_range(file_id)?;
            out.push(OverlayFile {
                overlay,
                start,
                end,
            });
        }
        Ok(out)
    }

    /// Bounded reader over an overlay's payload.
    pub fn read_overlay(&self, overlay: &OverlayFile) -> FileReader<'_, R> {
        FileReader::new(&self.src, overlay.start as u64, overlay.end as u64)
    }

    /// Every tree file as `(path, FileId)`, breadth first.
    pub fn walk(&self) -> Result<Vec<(String, FileId)>> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([ROOT]);
        let mut queue = VecDeque::from([(ROOT, ".".to_string())]);
        while let Some((dir, path)) = queue.pop_front() {
            for entry in self.read_dir(dir)? {
                match entry {
                    DirEntry::File { name, id } => out.push((join(&path, &name), id)),
                    // A corrupt image could link a directory twice.
                    DirEntry::Dir { name, id } => {
                        if seen.insert(id) {
                            queue.push_back((id, join(&path, &name)));
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl<R: ReadAt> FileSource for NitroFs<R> {
    fn list_dir(&self, path: &str) -> Result<Vec<SourceEntry>> {
        let Handle::Dir(dir) = self.open(path)? else {
            return Err(Error::NotADirectory(path.to_string()));
        };
        dir.entries()?
            .into_iter()
            .map(|e| -> Result<SourceEntry> {
                Ok(match e {
                    DirEntry::File { name, id } => SourceEntry {
                        name,
                        kind: EntryKind::File,
                        size: self.stat(id)?.size,
                    },
                    DirEntry::Dir { name, .. } => SourceEntry {
                        name,
                        kind: EntryKind::Dir,
                        size: 0,
                    },
                })
            })
            .collect()
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        match self.open(path)? {
            Handle::File(f) => Ok(Box::new(f.reader()?)),
            Handle::Dir(_) => Err(Error::NotFound(path.to_string())),
        }
    }

    fn list_overlays(&self, arm: Arm) -> Result<Vec<SourceOverlay>> {
        Ok(self
            .overlays(arm)?
            .into_iter()
            .map(|o| SourceOverlay {
                overlay: o.overlay,
                size: o.size(),
            })
            .collect())
    }

    fn open_overlay(&self, arm: Arm, index: usize) -> Result<Box<dyn Read + '_>> {
        let overlays = self.overlays(arm)?;
        let o = overlays
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("{arm:?} overlay {index}")))?;
        Ok(Box::new(self.read_overlay(o)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{MemTree, build};

    fn example() -> NitroFs<Vec<u8>> {
        let mut t = MemTree::new();
        t.add_file("A.txt", b"abc".to_vec()).unwrap();
        t.add_file("sub/B.bin", vec![0xFF]).unwrap();
        let mut out = Cursor::new(Vec::new());
        let info = build(&mut out, &t).unwrap();
        NitroFs::new(out.into_inner(), info)
    }

    #[test]
    fn lists_example_root() {
        let fs = example();
        assert_eq!(
            fs.read_dir(ROOT).unwrap(),
            [
                DirEntry::File {
                    name: "A.txt".into(),
                    id: 0
                },
                DirEntry::Dir {
                    name: "sub".into(),
                    id: 1
                },
            ]
        );
        assert_eq!(fs.num_directories().unwrap(), 2);
        assert_eq!(fs.parent(1).unwrap(), Some(ROOT));
        assert_eq!(fs.parent(ROOT).unwrap(), None);
    }

    #[test]
    fn open_paths() {
        let fs = example();
        let Handle::File(b) = fs.open("sub/B.bin").unwrap() else {
            panic!("expected file");
        };
        assert_eq!(b.id(), 1);
        assert_eq!(b.metadata().unwrap().size, 1);
        assert_eq!(b.read_to_vec().unwrap(), [0xFF]);

        let root = fs.open(".").unwrap().into_dir().unwrap();
        assert_eq!(root.id(), ROOT);
        assert!(root.metadata().is_dir());

        assert!(matches!(fs.open("missing/x"), Err(Error::NotFound(_))));
        assert!(matches!(fs.open("sub/nope"), Err(Error::NotFound(_))));
        assert!(matches!(fs.open("A.txt/x"), Err(Error::NotADirectory(p)) if p == "A.txt"));
        assert!(matches!(fs.open("sub//B.bin"), Err(Error::InvalidPath(_))));
        assert!(matches!(fs.open("../A.txt"), Err(Error::InvalidPath(_))));
        assert!(matches!(fs.open(""), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn pagination_resumes_file_ids() {
        let mut t = MemTree::new();
        for i in 0..5 {
            t.add_file(&format!("f{i}"), vec![i as u8]).unwrap();
        }
        t.add_dir("d").unwrap();
        let mut out = Cursor::new(Vec::new());
        let info = build(&mut out, &t).unwrap();
        let fs = NitroFs::new(out.into_inner(), info);

        let p1 = fs.list(ROOT, ListCursor::START, 2).unwrap();
        assert_eq!(p1.entries.len(), 2);
        assert!(!p1.done);
        let p2 = fs.list(ROOT, p1.cursor, 2).unwrap();
        assert_eq!(
            p2.entries,
            [
                DirEntry::File {
                    name: "f2".into(),
                    id: 2
                },
                DirEntry::File {
                    name: "f3".into(),
                    id: 3
                },
            ]
        );
        let p3 = fs.list(ROOT, p2.cursor, 2).unwrap();
        assert_eq!(p3.entries.len(), 2);
        assert!(p3.entries[1].is_dir());
        assert!(!p3.done);
        let p4 = fs.list(ROOT, p3.cursor, 2).unwrap();
        assert!(p4.entries.is_empty());
        assert!(p4.done);
        // The cursor parks on the terminator.
        let p5 = fs.list(ROOT, p4.cursor, 2).unwrap();
        assert!(p5.entries.is_empty() && p5.done);
    }

    #[test]
    fn dir_handle_reads_incrementally() {
        let fs = example();
        let mut root = fs.open(".").unwrap().into_dir().unwrap();
        assert_eq!(root.read_dir(1).unwrap().len(), 1);
        assert_eq!(root.read_dir(0).unwrap().len(), 1);
        assert!(root.read_dir(0).unwrap().is_empty());
        assert_eq!(root.entries().unwrap().len(), 2);
    }

    #[test]
    fn bare_0x80_terminates_subtable() {
        // One directory, subtable: file "x" then a zero-length dir record.
        let mut img = vec![8, 0, 0, 0, 0, 0, 1, 0, 0x01, b'x', 0x80, 0xAA];
        img.extend_from_slice(&[0x00, 0x02, 0, 0, 0x01, 0x02, 0, 0]);
        let info = Info {
            fnt_offset: 0,
            fnt_size: 12,
            fat_offset: 12,
            fat_size: 8,
            ..Default::default()
        };
        let fs = NitroFs::new(img, info);
        let page = fs.list(ROOT, ListCursor::START, 0).unwrap();
        assert!(page.done);
        assert_eq!(page.entries.len(), 1);
    }

    #[test]
    fn unterminated_subtable_is_an_error() {
        let img = vec![8, 0, 0, 0, 0, 0, 1, 0, 0x01, b'x', 0x01, b'y'];
        let info = Info {
            fnt_offset: 0,
            fnt_size: 12,
            ..Default::default()
        };
        let fs = NitroFs::new(img, info);
        assert!(matches!(fs.read_dir(ROOT), Err(Error::Io(_))));
    }

    #[test]
    fn out_of_range_ids() {
        let fs = example();
        assert!(matches!(fs.dir_entry(2), Err(Error::InvalidRange)));
        assert!(matches!(fs.stat(2), Err(Error::InvalidRange)));
        assert!(matches!(fs.read_file(99), Err(Error::InvalidRange)));
    }

    #[test]
    fn truncated_source_surfaces_io_error() {
        let fs = example();
        let info = *fs.info();
        let mut img = fs.into_inner();
        img.truncate(0x500);
        let fs = NitroFs::new(img, info);
        // B.bin lives at 0x600.
        assert!(matches!(fs.read_to_vec(1), Err(Error::Io(_))));
        assert_eq!(fs.read_to_vec(0).unwrap(), b"abc");
    }

    #[test]
    fn walk_is_breadth_first() {
        let fs = example();
        assert_eq!(
            fs.walk().unwrap(),
            [("A.txt".to_string(), 0), ("sub/B.bin".to_string(), 1)]
        );
    }
}
