//! Hierarchical file sources the builder can serialize.
//!
//! A source answers four questions: what a directory contains, how to read
//! a file, which overlays exist, and how to read an overlay's payload.
//! Paths are slash-separated and relative to the root; the root itself is
//! `"."`.
//!
//! Provided sources:
//!
//! | Type | Contents | Entry order |
//! |------|----------|-------------|
//! | [`MemTree`] | In-memory files, directories and overlays | insertion order |
//! | [`HostDir`] | A directory on the host filesystem | lexical by name |
//! | [`crate::NitroFs`] | An existing image, overlays included | on-disk order |

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::{Arm, Error, Overlay, Result};

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
}

/// One child of a source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Payload size in bytes (`0` for directories).
    pub size: u64,
}

/// One overlay offered by a source, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOverlay {
    /// Descriptor to store. `file_id` and `reserved` are overwritten by the
    /// builder.
    pub overlay: Overlay,
    /// Payload size in bytes.
    pub size: u64,
}

/// A hierarchical file source.
pub trait FileSource {
    /// List the children of the directory at `path`.
    fn list_dir(&self, path: &str) -> Result<Vec<SourceEntry>>;

    /// Open the file at `path` for reading.
    fn open_file(&self, path: &str) -> Result<Box<dyn Read + '_>>;

    /// Overlays for `arm`, in table order. Sources without overlays keep the
    /// default.
    fn list_overlays(&self, _arm: Arm) -> Result<Vec<SourceOverlay>> {
        Ok(Vec::new())
    }

    /// Open the payload of the `index`-th overlay for `arm`.
    fn open_overlay(&self, arm: Arm, index: usize) -> Result<Box<dyn Read + '_>> {
        Err(Error::NotFound(format!("{arm:?} overlay {index}")))
    }
}

impl<T: FileSource + ?Sized> FileSource for &T {
    fn list_dir(&self, path: &str) -> Result<Vec<SourceEntry>> {
        (**self).list_dir(path)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        (**self).open_file(path)
    }

    fn list_overlays(&self, arm: Arm) -> Result<Vec<SourceOverlay>> {
        (**self).list_overlays(arm)
    }

    fn open_overlay(&self, arm: Arm, index: usize) -> Result<Box<dyn Read + '_>> {
        (**self).open_overlay(arm, index)
    }
}

/// Split a relative path into its segments.
///
/// `"."` is the root and yields no segments. Empty segments, `.`/`..`
/// segments and rooted paths are rejected.
pub(crate) fn segments(path: &str) -> Result<Vec<&str>> {
    if path == "." {
        return Ok(Vec::new());
    }
    let segs: Vec<&str> = path.split('/').collect();
    if segs.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segs)
}

/// Join a directory path and a child name.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir == "." {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// In-memory file tree.
///
/// ```
/// use nitrofs::{Arm, MemTree, Overlay};
///
/// let mut tree = MemTree::new();
/// tree.add_file("A.txt", b"abc".to_vec()).unwrap();
/// tree.add_file("sub/B.bin", vec![0xFF]).unwrap();
/// tree.add_overlay(Arm::Arm9, Overlay::default(), vec![0; 16]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemTree {
    root: MemDir,
    arm9: Vec<(Overlay, Vec<u8>)>,
    arm7: Vec<(Overlay, Vec<u8>)>,
}

#[derive(Debug, Clone, Default)]
struct MemDir {
    entries: Vec<(String, MemNode)>,
}

#[derive(Debug, Clone)]
enum MemNode {
    File(Vec<u8>),
    Dir(MemDir),
}

impl MemDir {
    fn get(&self, name: &str) -> Option<&MemNode> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut MemNode> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Child directory `name`, created if missing.
    fn subdir(&mut self, name: &str) -> Result<&mut MemDir> {
        if self.get(name).is_none() {
            self.entries
                .push((name.to_string(), MemNode::Dir(MemDir::default())));
        }
        match self.get_mut(name) {
            Some(MemNode::Dir(d)) => Ok(d),
            _ => Err(Error::NotADirectory(name.to_string())),
        }
    }
}

impl MemTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a file, creating missing parent directories.
    pub fn add_file(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let segs = segments(path)?;
        let Some((name, parents)) = segs.split_last() else {
            return Err(Error::InvalidPath(path.to_string()));
        };
        let mut dir = &mut self.root;
        for seg in parents {
            dir = dir.subdir(seg)?;
        }
        match dir.get_mut(name) {
            Some(MemNode::File(old)) => *old = data.into(),
            Some(MemNode::Dir(_)) => return Err(Error::InvalidPath(path.to_string())),
            None => dir
                .entries
                .push((name.to_string(), MemNode::File(data.into()))),
        }
        Ok(())
    }

    /// Add a directory (and any missing parents).
    pub fn add_dir(&mut self, path: &str) -> Result<()> {
        let mut dir = &mut self.root;
        for seg in segments(path)? {
            dir = dir.subdir(seg)?;
        }
        Ok(())
    }

    /// Append an overlay to the table for `arm`.
    pub fn add_overlay(&mut self, arm: Arm, overlay: Overlay, data: impl Into<Vec<u8>>) {
        let list = match arm {
            Arm::Arm9 => &mut self.arm9,
            Arm::Arm7 => &mut self.arm7,
        };
        list.push((overlay, data.into()));
    }

    fn dir_at(&self, segs: &[&str], path: &str) -> Result<&MemDir> {
        let mut dir = &self.root;
        for seg in segs {
            match dir.get(seg) {
                Some(MemNode::Dir(d)) => dir = d,
                Some(MemNode::File(_)) => return Err(Error::NotADirectory(path.to_string())),
                None => return Err(Error::NotFound(path.to_string())),
            }
        }
        Ok(dir)
    }

    fn file_at(&self, path: &str) -> Result<&[u8]> {
        let segs = segments(path)?;
        let Some((name, parents)) = segs.split_last() else {
            return Err(Error::NotFound(path.to_string()));
        };
        match self.dir_at(parents, path)?.get(name) {
            Some(MemNode::File(data)) => Ok(data.as_slice()),
            _ => Err(Error::NotFound(path.to_string())),
        }
    }

    fn overlays(&self, arm: Arm) -> &[(Overlay, Vec<u8>)] {
        match arm {
            Arm::Arm9 => &self.arm9,
            Arm::Arm7 => &self.arm7,
        }
    }
}

impl FileSource for MemTree {
    fn list_dir(&self, path: &str) -> Result<Vec<SourceEntry>> {
        let dir = self.dir_at(&segments(path)?, path)?;
        Ok(dir
            .entries
            .iter()
            .map(|(name, node)| match node {
                MemNode::File(data) => SourceEntry {
                    name: name.clone(),
                    kind: EntryKind::File,
                    size: data.len() as u64,
                },
                MemNode::Dir(_) => SourceEntry {
                    name: name.clone(),
                    kind: EntryKind::Dir,
                    size: 0,
                },
            })
            .collect())
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.file_at(path)?)))
    }

    fn list_overlays(&self, arm: Arm) -> Result<Vec<SourceOverlay>> {
        Ok(self
            .overlays(arm)
            .iter()
            .map(|(overlay, data)| SourceOverlay {
                overlay: *overlay,
                size: data.len() as u64,
            })
            .collect())
    }

    fn open_overlay(&self, arm: Arm, index: usize) -> Result<Box<dyn Read + '_>> {
        let (_, data) = self
            .overlays(arm)
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("{arm:?} overlay {index}")))?;
        Ok(Box::new(Cursor::new(data.as_slice())))
    }
}

/// A directory on the host filesystem.
///
/// Children are listed in lexical order; symbolic links are followed.
/// Entries that are neither files nor directories are skipped.
#[derive(Debug, Clone)]
pub struct HostDir {
    root: PathBuf,
}

impl HostDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut full = self.root.clone();
        full.extend(segments(path)?);
        Ok(full)
    }
}

impl FileSource for HostDir {
    fn list_dir(&self, path: &str) -> Result<Vec<SourceEntry>> {
        let dir = self.resolve(path)?;
        let mut out = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let ft = entry.file_type();
            if ft.is_dir() {
                out.push(SourceEntry {
                    name,
                    kind: EntryKind::Dir,
                    size: 0,
                });
            } else if ft.is_file() {
                let size = entry.metadata().map_err(io::Error::from)?.len();
                out.push(SourceEntry {
                    name,
                    kind: EntryKind::File,
                    size,
                });
            } else {
                debug!(path = %entry.path().display(), "skipping special file");
            }
        }
        Ok(out)
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn segments_rejects_escapes() {
        assert!(segments(".").unwrap().is_empty());
        assert_eq!(segments("a/b").unwrap(), ["a", "b"]);
        for bad in ["", "/a", "a/", "a//b", "a/../b", "./a", ".."] {
            assert!(
                matches!(segments(bad), Err(Error::InvalidPath(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn join_paths() {
        assert_eq!(join(".", "a"), "a");
        assert_eq!(join("a", "b"), "a/b");
    }

    #[test]
    fn mem_tree_keeps_insertion_order() {
        let mut t = MemTree::new();
        t.add_file("z.bin", vec![1, 2]).unwrap();
        t.add_file("d/x", vec![3]).unwrap();
        t.add_file("a.bin", Vec::<u8>::new()).unwrap();
        t.add_dir("d/e/f").unwrap();

        let root = t.list_dir(".").unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["z.bin", "d", "a.bin"]);
        assert_eq!(root[0].size, 2);
        assert_eq!(root[1].kind, EntryKind::Dir);

        let d = t.list_dir("d").unwrap();
        assert_eq!(d.len(), 2);
        assert!(t.list_dir("d/e/f").unwrap().is_empty());

        let mut buf = Vec::new();
        t.open_file("d/x").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, [3]);
    }

    #[test]
    fn mem_tree_path_errors() {
        let mut t = MemTree::new();
        t.add_file("f", vec![0]).unwrap();
        assert!(matches!(t.add_file("f/g", Vec::<u8>::new()), Err(Error::NotADirectory(_))));
        assert!(matches!(t.list_dir("f"), Err(Error::NotADirectory(_))));
        assert!(matches!(t.list_dir("f/g"), Err(Error::NotADirectory(_))));
        assert!(matches!(t.list_dir("nope"), Err(Error::NotFound(_))));
        assert!(t.open_file("nope").is_err());
        assert!(t.open_overlay(Arm::Arm9, 0).is_err());
    }

    #[test]
    fn host_dir_lists_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.bin"), [1, 2, 3]).unwrap();
        fs::write(tmp.path().join("a.txt"), b"hi").unwrap();
        fs::create_dir(tmp.path().join("c")).unwrap();
        fs::write(tmp.path().join("c").join("inner"), b"").unwrap();

        let src = HostDir::new(tmp.path());
        let root = src.list_dir(".").unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.bin", "c"]);
        assert_eq!(root[1].size, 3);
        assert_eq!(root[2].kind, EntryKind::Dir);
        assert_eq!(src.list_dir("c").unwrap()[0].name, "inner");

        let mut buf = Vec::new();
        src.open_file("a.txt").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hi");
        assert!(src.list_overlays(Arm::Arm9).unwrap().is_empty());
    }
}
