//! Trusted assembly list and native search path construction.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Separator used by the runtime for path lists
#[cfg(unix)]
pub const PATH_LIST_SEPARATOR: char = ':';
#[cfg(not(unix))]
pub const PATH_LIST_SEPARATOR: char = ';';

/// Recognized assembly extensions, highest priority first.
///
/// `.ni.dll` is probed before `.dll` so native images win when both exist.
pub const ASSEMBLY_EXTENSIONS: [&str; 4] = [".ni.dll", ".dll", ".ni.exe", ".exe"];

/// Ordered list of absolute paths joined with [`PATH_LIST_SEPARATOR`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathList {
    entries: Vec<PathBuf>,
}

impl PathList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(path.into());
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", PATH_LIST_SEPARATOR)?;
            }
            write!(f, "{}", entry.display())?;
        }
        Ok(())
    }
}

/// Assemblies the runtime may load without further probing
pub type TrustedAssemblyList = PathList;

/// Directories probed for native interop libraries
pub type NativeSearchPath = PathList;

/// Build the trusted assembly list for `directories`.
///
/// `seed`, when non-empty, is placed first so "first match wins" resolution
/// always picks it over a same-named framework assembly.
pub fn build(directories: &[&Path], seed: Option<&Path>) -> TrustedAssemblyList {
    let mut list = TrustedAssemblyList::new();

    if let Some(seed) = seed.filter(|p| !p.as_os_str().is_empty()) {
        list.push(seed);
    }

    for directory in directories {
        add_directory(directory, &mut list);
    }

    log::debug!("Trusted assembly list has {} entries", list.len());
    list
}

/// Build the native search path: application dir, override dir, runtime dir
pub fn native_search_path(
    app_dir: &Path,
    override_dir: Option<&Path>,
    runtime_dir: &Path,
) -> NativeSearchPath {
    let mut list = NativeSearchPath::new();
    list.push(app_dir);
    if let Some(dir) = override_dir {
        list.push(dir);
    }
    list.push(runtime_dir);
    list
}

/// Append every assembly found in `directory`, one per base name
fn add_directory(directory: &Path, list: &mut TrustedAssemblyList) {
    let mut candidates = match fs::read_dir(directory) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(is_regular_file)
            .filter_map(|entry| utf8_file_name(&entry))
            .filter_map(|name| classify(&name).map(|ext| (name, ext)))
            .collect::<Vec<_>>(),
        Err(e) => {
            log::debug!("Skipping unreadable directory {}: {}", directory.display(), e);
            return;
        }
    };
    candidates.sort();

    let mut added: HashSet<String> = HashSet::new();

    // One pass per extension so higher-priority variants are appended first
    for (priority, ext) in ASSEMBLY_EXTENSIONS.iter().enumerate() {
        for (name, _) in candidates.iter().filter(|(_, p)| *p == priority) {
            let base = &name[..name.len() - ext.len()];
            if added.insert(base.to_string()) {
                list.push(directory.join(name));
            }
        }
    }
}

/// Runtime properties are UTF-8, so other names cannot be passed on
fn utf8_file_name(entry: &fs::DirEntry) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) => Some(name),
        Err(_) => {
            log::warn!(
                "Skipping {}: file name is not valid UTF-8",
                entry.path().display()
            );
            None
        }
    }
}

/// Index of the highest-priority extension `name` carries, with a non-empty base
fn classify(name: &str) -> Option<usize> {
    ASSEMBLY_EXTENSIONS
        .iter()
        .position(|ext| name.len() > ext.len() && name.ends_with(ext))
}

fn is_regular_file(entry: &fs::DirEntry) -> bool {
    match entry.file_type() {
        Ok(ft) if ft.is_file() => true,
        Ok(ft) if ft.is_symlink() => fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false),
        _ => false,
    }
}
