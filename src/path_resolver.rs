//! Mapping of registry message filenames onto a mounted Windows image.
//!
//! Message filenames come straight from the registry of the imaged system, e.g.
//! `%SystemRoot%\system32\EventCreate.exe` or `C:\Windows\System32\wevtapi.dll`. They are resolved
//! segment by segment against the real filesystem, matching every segment case-insensitively,
//! since the image is usually stored on a case-sensitive filesystem.

use crate::err::{Error, Result};

use log::trace;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_SYSTEM_ROOT: &str = "C:\\Windows";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A message filename resolved to an existing file, with the on-disk casing of every segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    SystemRoot,
    WinDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CandidatePath {
    drive: Option<char>,
    segments: Vec<Segment>,
}

fn split_drive(path: &str) -> (Option<char>, &str) {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => {
            let rest = &path[2..];
            (Some(letter), rest.strip_prefix('\\').unwrap_or(rest))
        }
        _ => (None, path),
    }
}

/// Split a message filename into its drive letter and segments.
///
/// Returns `Ok(None)` for an empty filename.
fn parse_candidate(candidate: &str) -> Result<Option<CandidatePath>> {
    if candidate.is_empty() {
        return Ok(None);
    }

    let (drive, rest) = split_drive(candidate);

    let malformed = |message| Error::MalformedPath {
        filename: candidate.to_string(),
        message,
    };

    let mut segments = Vec::new();
    for segment in rest.split('\\') {
        let segment = match segment {
            "" => return Err(malformed("empty path segment")),
            "." | ".." => return Err(malformed("relative path segment")),
            s if s.eq_ignore_ascii_case("%SystemRoot%") => Segment::SystemRoot,
            s if s.eq_ignore_ascii_case("%WinDir%") => Segment::WinDir,
            s => Segment::Literal(s.to_string()),
        };
        segments.push(segment);
    }

    Ok(Some(CandidatePath { drive, segments }))
}

/// `X:\Windows\Sub` -> `(Some('X'), ["Windows", "Sub"])`
fn directory_segments(directory: &str) -> (Option<char>, impl Iterator<Item = &str>) {
    let (drive, rest) = split_drive(directory);
    (drive, rest.split('\\').filter(|s| !s.is_empty()))
}

/// Compare two entry names ignoring case. Names of different byte lengths never match.
fn eq_no_case(a: &str, b: &str) -> bool {
    a.len() == b.len() && (a == b || a.to_lowercase() == b.to_lowercase())
}

/// Find the entry of `directory` named `name` ignoring case, returning its on-disk name.
///
/// When several entries match, the lexicographically smallest name is returned. A missing
/// `directory` is reported as `Ok(None)`.
pub fn find_entry_no_case(directory: &Path, name: &str, kind: EntryKind) -> Result<Option<String>> {
    trace!("Scanning `{}` for {kind:?} `{name}`", directory.display());

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(directory, e)),
    };

    let mut found: Option<String> = None;

    for entry in entries {
        let entry = entry.map_err(|e| Error::io(directory, e))?;
        let file_name = entry.file_name();

        // Names that are not valid UTF-8 cannot have come from the registry.
        let Some(file_name) = file_name.to_str() else {
            continue;
        };

        if !eq_no_case(file_name, name) {
            continue;
        }

        // Follows symbolic links, a link to a file counts as a file.
        let is_kind = match fs::metadata(entry.path()) {
            Ok(metadata) => match kind {
                EntryKind::Directory => metadata.is_dir(),
                EntryKind::File => metadata.is_file(),
            },
            Err(_) => false,
        };

        if is_kind && found.as_deref().is_none_or(|current| file_name < current) {
            found = Some(file_name.to_string());
        }
    }

    Ok(found)
}

/// Resolves message filenames against the filesystem.
#[derive(Debug, Clone)]
pub struct PathResolver {
    system_root: String,
    windows_directory: String,
    search_root: Option<PathBuf>,
}

impl Default for PathResolver {
    fn default() -> Self {
        PathResolver {
            system_root: DEFAULT_SYSTEM_ROOT.to_string(),
            windows_directory: DEFAULT_SYSTEM_ROOT.to_string(),
            search_root: None,
        }
    }
}

impl PathResolver {
    /// `search_root` is the directory the image is mounted at (the directory containing the
    /// `Windows` directory). Without it, paths are resolved relative to the working directory.
    pub fn new(search_root: Option<PathBuf>) -> Self {
        PathResolver {
            search_root,
            ..Default::default()
        }
    }

    /// Set `%SystemRoot%`. `%WinDir%` follows it.
    pub fn set_system_root(&mut self, system_root: impl Into<String>) {
        self.system_root = system_root.into();
        self.windows_directory = self.system_root.clone();
    }

    pub fn set_windows_directory(&mut self, windows_directory: impl Into<String>) {
        self.windows_directory = windows_directory.into();
    }

    pub fn system_root(&self) -> &str {
        &self.system_root
    }

    pub fn windows_directory(&self) -> &str {
        &self.windows_directory
    }

    pub fn search_root(&self) -> Option<&Path> {
        self.search_root.as_deref()
    }

    /// Resolve `candidate` to an existing file.
    ///
    /// `Ok(None)` when the filename is empty or any of its segments does not exist.
    pub fn resolve(&self, candidate: &str) -> Result<Option<ResolvedPath>> {
        let Some((root, mut segments)) = self.expand(candidate)? else {
            return Ok(None);
        };
        let Some(file_name) = segments.pop() else {
            return Ok(None);
        };

        let steps = segments
            .iter()
            .map(|s| (s.as_str(), EntryKind::Directory))
            .chain(std::iter::once((file_name.as_str(), EntryKind::File)));

        self.walk(root, steps)
    }

    /// Resolve the MUI satellite of `candidate`: `<directory>\<language_tag>\<file name>.mui`.
    pub fn resolve_mui(&self, candidate: &str, language_tag: &str) -> Result<Option<ResolvedPath>> {
        let Some((root, mut segments)) = self.expand(candidate)? else {
            return Ok(None);
        };
        let Some(file_name) = segments.pop() else {
            return Ok(None);
        };
        let mui_file_name = format!("{file_name}.mui");

        let steps = segments
            .iter()
            .map(|s| (s.as_str(), EntryKind::Directory))
            .chain([
                (language_tag, EntryKind::Directory),
                (mui_file_name.as_str(), EntryKind::File),
            ]);

        self.walk(root, steps)
    }

    /// Expand tokens of `candidate`, returning the directory to start at and the segments below it.
    fn expand(&self, candidate: &str) -> Result<Option<(PathBuf, Vec<String>)>> {
        let Some(parsed) = parse_candidate(candidate)? else {
            return Ok(None);
        };

        let mut drive = parsed.drive;
        let mut segments = Vec::with_capacity(parsed.segments.len() + 2);

        for segment in parsed.segments {
            let directory = match segment {
                Segment::Literal(s) => {
                    segments.push(s);
                    continue;
                }
                Segment::SystemRoot => &self.system_root,
                Segment::WinDir => &self.windows_directory,
            };

            let (token_drive, token_segments) = directory_segments(directory);
            drive = drive.or(token_drive);
            segments.extend(token_segments.map(str::to_string));
        }

        Ok(Some((self.root_directory(drive), segments)))
    }

    fn root_directory(&self, drive: Option<char>) -> PathBuf {
        if let Some(search_root) = &self.search_root {
            return search_root.clone();
        }
        if cfg!(windows) {
            if let Some(drive) = drive {
                return PathBuf::from(format!("{drive}:\\"));
            }
        }
        PathBuf::from(".")
    }

    fn walk<'s>(
        &self,
        root: PathBuf,
        steps: impl Iterator<Item = (&'s str, EntryKind)>,
    ) -> Result<Option<ResolvedPath>> {
        let mut path = root;

        for (name, kind) in steps {
            match find_entry_no_case(&path, name, kind)? {
                Some(on_disk) => path.push(on_disk),
                None => {
                    trace!("`{name}` not found in `{}`", path.display());
                    return Ok(None);
                }
            }
        }

        Ok(Some(ResolvedPath(path)))
    }
}
