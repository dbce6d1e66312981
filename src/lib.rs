//! **nitrofs** - reader and builder for NitroFS, the filesystem embedded in
//! Nintendo DS cartridge images.
//!
//! A NitroFS is four tables plus file payloads:
//!
//! | Table | Contents |
//! |-------|----------|
//! | FNT   | Directory main table and per-directory name subtables |
//! | FAT   | `[start, end)` byte range of every file |
//! | OVT9  | ARM9 overlay descriptors (nameless files outside the tree) |
//! | OVT7  | ARM7 overlay descriptors |
//!
//! Their offsets and sizes form an [`Info`], which the surrounding ROM
//! header persists. [`build`] produces an image and its [`Info`] from any
//! [`FileSource`]; [`NitroFs`] opens an image given its [`Info`].
//!
//! ```
//! use std::io::Cursor;
//! use nitrofs::{MemTree, NitroFs};
//!
//! let mut tree = MemTree::new();
//! tree.add_file("data/hello.txt", b"hi".to_vec())?;
//!
//! let mut image = Cursor::new(Vec::new());
//! let info = nitrofs::build(&mut image, &tree)?;
//!
//! let fs = NitroFs::new(image.into_inner(), info);
//! let file = fs.open("data/hello.txt")?.into_file().unwrap();
//! assert_eq!(file.read_to_vec()?, b"hi");
//! # Ok::<(), nitrofs::Error>(())
//! ```
//!
//! Payload compression is the caller's business: files are stored and
//! returned byte for byte.

pub mod build;
pub mod error;
pub mod info;
pub mod io;
pub mod overlay;
pub mod reader;
pub mod regions;
pub mod source;
pub mod utils;
pub mod validate;

pub use build::{build, build_plan};
pub use error::{Error, Result, ValidationErrorKind, ValidationErrors, ValidationIssue};
pub use info::Info;
pub use io::{FileReader, Locked, ReadAt};
pub use overlay::{Arm, Overlay, OverlayFile};
pub use reader::{
    DirEntry, DirHandle, DirId, DirTableEntry, FileHandle, FileId, Handle, ListCursor, Listing,
    Metadata, NitroFs, ROOT,
};
pub use regions::{Region, RegionKind};
pub use source::{EntryKind, FileSource, HostDir, MemTree, SourceEntry, SourceOverlay};
pub use validate::{Plan, is_valid_name, validate};

/// Alignment of the FNT, FAT, overlay tables and every file payload.
pub const ALIGNMENT: u64 = 0x200;

/// Longest entry name, in bytes.
pub const MAX_NAME_LEN: usize = 127;

/// Largest image the builder will produce (512 MiB).
pub const MAX_IMAGE_SIZE: u64 = 512 * 1024 * 1024;

/// Directory references are 12 bits wide.
pub const MAX_DIRECTORIES: usize = 0x1000;

/// File IDs are 16 bits wide; overlays count.
pub const MAX_FILES: usize = 0x10000;

pub const DIR_ENTRY_SIZE: u32 = 8;
pub const FAT_ENTRY_SIZE: u32 = 8;
pub const OVERLAY_ENTRY_SIZE: u32 = Overlay::SIZE as u32;

/// Tag carried by directory references in subtables and parent fields.
pub const DIR_REF_TAG: u16 = 0xF000;
pub(crate) const DIR_REF_MASK: u16 = 0x0FFF;
