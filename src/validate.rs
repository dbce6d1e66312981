//! Source validation and table sizing.
//!
//! [`validate`] walks a [`FileSource`] breadth-first, checks every name,
//! assigns directory IDs in discovery order and measures the name-table
//! subtables. The resulting [`Plan`] is what the builder serializes; its
//! directory list is indexed by directory ID, so dequeue order and ID order
//! are the same thing.
//!
//! Every failed check is collected before returning, so callers see all
//! problems at once.

use std::collections::VecDeque;

use tracing::debug;

use crate::build::Layout;
use crate::error::{ValidationErrorKind, ValidationErrors};
use crate::source::{EntryKind, FileSource, SourceOverlay, join};
use crate::{Arm, MAX_DIRECTORIES, MAX_FILES, MAX_IMAGE_SIZE, MAX_NAME_LEN, Result};

const ILLEGAL: &[u8] = b"\\/?\"<>*:;|";

/// Check a single entry name, recording every rule it breaks.
pub(crate) fn check_name(path: &str, name: &str, errs: &mut ValidationErrors) {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        errs.push(path, ValidationErrorKind::EmptyName);
    }
    if bytes
        .iter()
        .any(|&b| !(0x20..=0x7E).contains(&b) || ILLEGAL.contains(&b))
    {
        errs.push(path, ValidationErrorKind::IllegalCharacters);
    }
    if bytes.len() > MAX_NAME_LEN {
        errs.push(path, ValidationErrorKind::NameTooLong);
    }
}

/// Whether `name` is acceptable as a NitroFS entry name.
pub fn is_valid_name(name: &str) -> bool {
    let mut errs = ValidationErrors::default();
    check_name(name, name, &mut errs);
    errs.is_empty()
}

#[derive(Debug, Clone)]
pub(crate) struct PlanFile {
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) size: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PlanDir {
    pub(crate) name: String,
    pub(crate) path: String,
    /// Parent directory ID; `None` for the root.
    pub(crate) parent: Option<usize>,
    pub(crate) files: Vec<PlanFile>,
    /// Child directory IDs, in source order.
    pub(crate) subdirs: Vec<usize>,
}

/// A validated source, ready to be serialized.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Directories indexed by directory ID (`0` is the root).
    pub(crate) dirs: Vec<PlanDir>,
    pub(crate) arm9: Vec<SourceOverlay>,
    pub(crate) arm7: Vec<SourceOverlay>,
    pub(crate) num_files: usize,
    pub(crate) subtable_len: u64,
}

impl Plan {
    pub fn num_directories(&self) -> usize {
        self.dirs.len()
    }

    /// Number of files in the directory tree (overlays excluded).
    pub fn num_files(&self) -> usize {
        self.num_files
    }

    /// Number of overlay files, ARM9 and ARM7 combined.
    pub fn num_overlay_files(&self) -> usize {
        self.arm9.len() + self.arm7.len()
    }

    /// Combined byte length of every subtable, terminators included.
    pub fn subtable_len(&self) -> u64 {
        self.subtable_len
    }

    pub(crate) fn overlays(&self, arm: Arm) -> &[SourceOverlay] {
        match arm {
            Arm::Arm9 => &self.arm9,
            Arm::Arm7 => &self.arm7,
        }
    }

    /// Payload sizes in FileId order.
    pub(crate) fn payload_sizes(&self) -> impl Iterator<Item = u64> + '_ {
        self.arm9
            .iter()
            .chain(&self.arm7)
            .map(|o| o.size)
            .chain(self.dirs.iter().flat_map(|d| d.files.iter().map(|f| f.size)))
    }
}

/// Validate `src` without building it.
pub fn validate<S: FileSource + ?Sized>(src: &S) -> Result<Plan> {
    let mut errs = ValidationErrors::default();
    let mut dirs = vec![PlanDir {
        name: String::new(),
        path: ".".to_string(),
        parent: None,
        files: Vec::new(),
        subdirs: Vec::new(),
    }];
    let mut num_files = 0usize;
    // Root terminator.
    let mut subtable_len = 1u64;

    let mut queue = VecDeque::from([0usize]);
    // Stop discovering once the directory cap is passed; a linked cycle in
    // the source would otherwise grow the queue without bound.
    'walk: while let Some(id) = queue.pop_front() {
        let dir_path = dirs[id].path.clone();
        for entry in src.list_dir(&dir_path)? {
            let path = join(&dir_path, &entry.name);
            check_name(&path, &entry.name, &mut errs);
            subtable_len += 1 + entry.name.len() as u64;

            match entry.kind {
                EntryKind::File => {
                    dirs[id].files.push(PlanFile {
                        name: entry.name,
                        path,
                        size: entry.size,
                    });
                    num_files += 1;
                }
                EntryKind::Dir => {
                    // Child reference in the parent, terminator in its own subtable.
                    subtable_len += 3;
                    let child = dirs.len();
                    dirs.push(PlanDir {
                        name: entry.name,
                        path,
                        parent: Some(id),
                        files: Vec::new(),
                        subdirs: Vec::new(),
                    });
                    dirs[id].subdirs.push(child);
                    queue.push_back(child);
                    if dirs.len() > MAX_DIRECTORIES {
                        break 'walk;
                    }
                }
            }
        }
    }

    let plan = Plan {
        dirs,
        arm9: src.list_overlays(Arm::Arm9)?,
        arm7: src.list_overlays(Arm::Arm7)?,
        num_files,
        subtable_len,
    };

    if plan.num_directories() > MAX_DIRECTORIES {
        errs.push(".", ValidationErrorKind::TooManyDirectories);
    }
    if plan.num_files() + plan.num_overlay_files() > MAX_FILES {
        errs.push(".", ValidationErrorKind::TooManyFiles);
    }
    let projected = Layout::new(0, &plan).end(plan.payload_sizes());
    if projected.is_none_or(|end| end > MAX_IMAGE_SIZE) {
        errs.push(".", ValidationErrorKind::TooLarge);
    }

    debug!(
        directories = plan.num_directories(),
        files = plan.num_files(),
        overlays = plan.num_overlay_files(),
        subtable_len = plan.subtable_len,
        ?projected,
        issues = errs.issues.len(),
        "validated NitroFS source"
    );

    if errs.is_empty() {
        Ok(plan)
    } else {
        Err(errs.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceEntry;
    use crate::{Error, MemTree, Overlay};

    fn kinds(err: Error) -> Vec<ValidationErrorKind> {
        match err {
            Error::Validation(v) => v.issues.iter().map(|i| i.kind).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn accepts_printable_names() {
        assert!(is_valid_name("a"));
        assert!(is_valid_name("Hello World (v1.2) [x] #~!"));
        assert!(is_valid_name(&"x".repeat(127)));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(&"x".repeat(128)));
        for c in ['\\', '/', '?', '"', '<', '>', '*', ':', ';', '|', '\t', '\x7F', 'é'] {
            assert!(!is_valid_name(&format!("a{c}b")), "{c:?}");
        }
    }

    #[test]
    fn counts_and_subtable_footprint() {
        let mut t = MemTree::new();
        t.add_file("A.txt", b"abc".to_vec()).unwrap();
        t.add_file("sub/B.bin", vec![0xFF]).unwrap();
        let plan = validate(&t).unwrap();

        assert_eq!(plan.num_directories(), 2);
        assert_eq!(plan.num_files(), 2);
        assert_eq!(plan.num_overlay_files(), 0);
        // root: 6 + 4 + 2 + 1, sub: 6 + 1
        assert_eq!(plan.subtable_len(), 13 + 7);
        assert_eq!(plan.dirs[1].parent, Some(0));
        assert_eq!(plan.dirs[1].path, "sub");
        assert_eq!(plan.dirs[1].files[0].path, "sub/B.bin");
    }

    #[test]
    fn ids_are_breadth_first() {
        let mut t = MemTree::new();
        t.add_dir("a/deep").unwrap();
        t.add_dir("b").unwrap();
        t.add_dir("a/other").unwrap();
        let plan = validate(&t).unwrap();
        let paths: Vec<_> = plan.dirs.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, [".", "a", "b", "a/deep", "a/other"]);
        assert_eq!(plan.dirs[0].subdirs, [1, 2]);
        assert_eq!(plan.dirs[1].subdirs, [3, 4]);
        assert_eq!(plan.dirs[4].parent, Some(1));
    }

    #[test]
    fn collects_every_violation() {
        let mut t = MemTree::new();
        t.add_file("bad?name", vec![1]).unwrap();
        t.add_file(&"l".repeat(130), vec![1]).unwrap();
        t.add_file("ok/also:bad", vec![1]).unwrap();
        let k = kinds(validate(&t).unwrap_err());
        assert_eq!(
            k,
            [
                ValidationErrorKind::IllegalCharacters,
                ValidationErrorKind::NameTooLong,
                ValidationErrorKind::IllegalCharacters,
            ]
        );
    }

    /// Claims a single file far larger than any image may hold.
    struct Oversized;

    impl FileSource for Oversized {
        fn list_dir(&self, _path: &str) -> Result<Vec<SourceEntry>> {
            Ok(vec![SourceEntry {
                name: "huge.bin".to_string(),
                kind: EntryKind::File,
                size: MAX_IMAGE_SIZE,
            }])
        }

        fn open_file(&self, _path: &str) -> Result<Box<dyn std::io::Read + '_>> {
            Ok(Box::new(std::io::empty()))
        }
    }

    #[test]
    fn enforces_size_ceiling() {
        let k = kinds(validate(&Oversized).unwrap_err());
        assert_eq!(k, [ValidationErrorKind::TooLarge]);
    }

    /// Declares a size no image layout can represent.
    struct Unbounded;

    impl FileSource for Unbounded {
        fn list_dir(&self, _path: &str) -> Result<Vec<SourceEntry>> {
            Ok(vec![
                SourceEntry {
                    name: "a.bin".to_string(),
                    kind: EntryKind::File,
                    size: 1,
                },
                SourceEntry {
                    name: "b.bin".to_string(),
                    kind: EntryKind::File,
                    size: u64::MAX,
                },
            ])
        }

        fn open_file(&self, _path: &str) -> Result<Box<dyn std::io::Read + '_>> {
            Ok(Box::new(std::io::empty()))
        }
    }

    #[test]
    fn size_overflow_is_too_large() {
        let k = kinds(validate(&Unbounded).unwrap_err());
        assert_eq!(k, [ValidationErrorKind::TooLarge]);
    }

    #[cfg(unix)]
    #[test]
    fn linked_cycles_stop_at_directory_cap() {
        use std::os::unix::fs::symlink;

        use crate::HostDir;

        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        std::fs::create_dir(&a).unwrap();
        symlink("..", a.join("u1")).unwrap();
        symlink("..", a.join("u2")).unwrap();

        let k = kinds(validate(&HostDir::new(tmp.path())).unwrap_err());
        assert_eq!(k, [ValidationErrorKind::TooManyDirectories]);
    }

    #[test]
    fn overlays_are_counted() {
        let mut t = MemTree::new();
        t.add_overlay(Arm::Arm9, Overlay::default(), vec![0; 16]);
        t.add_overlay(Arm::Arm7, Overlay::default(), vec![0; 4]);
        let plan = validate(&t).unwrap();
        assert_eq!(plan.num_overlay_files(), 2);
        assert_eq!(plan.payload_sizes().collect::<Vec<_>>(), [16, 4]);
    }

    #[test]
    fn too_many_directories() {
        let mut t = MemTree::new();
        for i in 0..MAX_DIRECTORIES {
            t.add_dir(&format!("d{i}")).unwrap();
        }
        let k = kinds(validate(&t).unwrap_err());
        assert_eq!(k, [ValidationErrorKind::TooManyDirectories]);
    }
}
