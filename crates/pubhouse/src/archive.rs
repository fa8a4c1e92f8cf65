//! Validation of uploaded package archives
//!
//! An archive is a gzip-compressed tar stream carrying a [`MANIFEST_FILE`] either at
//! its root or inside a single top-level directory. Validation happens entirely in
//! memory: entries are read from the byte buffer, only regular files are inspected,
//! and links are never followed.

use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Component;
use tar::{Archive, EntryType};

use crate::error::{ArchiveError, Result};
use crate::manifest::{MANIFEST_FILE, Manifest};

/// Largest manifest accepted
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// Largest README or CHANGELOG captured; bigger documents are skipped
pub const MAX_DOCUMENT_BYTES: u64 = 512 * 1024;

/// Everything extracted from a valid archive
#[derive(Debug, Clone)]
pub struct ValidatedArchive {
    pub manifest: Manifest,
    pub readme: Option<String>,
    pub changelog: Option<String>,
    /// Regular files relative to the package root (wrapper directory stripped)
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Document {
    Readme,
    Changelog,
}

impl Document {
    fn from_file_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "readme.md" | "readme" => Some(Self::Readme),
            "changelog.md" | "changelog" => Some(Self::Changelog),
            _ => None,
        }
    }
}

/// Raw findings of a single pass over the archive
#[derive(Default)]
struct Scan {
    /// Regular files as path segments
    files: Vec<Vec<String>>,
    /// (wrapper directory, manifest text) in archive order
    manifests: Vec<(Option<String>, String)>,
    documents: HashMap<(Option<String>, Document), String>,
}

/// Validate an uploaded archive and extract its manifest and documents
pub fn validate_archive(bytes: &[u8]) -> Result<ValidatedArchive> {
    let mut scan = scan_archive(bytes)?;

    let position = scan
        .manifests
        .iter()
        .position(|(dir, _)| dir.is_none())
        .or_else(|| (!scan.manifests.is_empty()).then_some(0))
        .ok_or(ArchiveError::ManifestMissing)?;
    let (root, manifest_text) = scan.manifests.swap_remove(position);

    let manifest = Manifest::parse(&manifest_text)?;

    let readme = scan.documents.remove(&(root.clone(), Document::Readme));
    let changelog = scan.documents.remove(&(root.clone(), Document::Changelog));

    let files = scan
        .files
        .into_iter()
        .filter_map(|segments| relative_to(&root, segments))
        .collect();

    Ok(ValidatedArchive {
        manifest,
        readme,
        changelog,
        files,
    })
}

fn relative_to(root: &Option<String>, segments: Vec<String>) -> Option<String> {
    match root {
        None => Some(segments.join("/")),
        Some(dir) if segments.len() > 1 && &segments[0] == dir => Some(segments[1..].join("/")),
        Some(_) => None,
    }
}

fn scan_archive(bytes: &[u8]) -> Result<Scan> {
    if bytes.is_empty() {
        return Err(ArchiveError::malformed("archive is empty"));
    }

    let mut archive = Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::malformed(format!("cannot read archive: {}", e)))?;

    let mut scan = Scan::default();

    for entry in entries {
        let mut entry =
            entry.map_err(|e| ArchiveError::malformed(format!("cannot read archive entry: {}", e)))?;

        let segments = {
            let path = entry
                .path()
                .map_err(|e| ArchiveError::malformed(format!("unreadable entry path: {}", e)))?;
            path_segments(&path)?
        };

        // Directories, symlinks, hard links and devices carry no content we read
        if !matches!(
            entry.header().entry_type(),
            EntryType::Regular | EntryType::Continuous
        ) || segments.is_empty()
        {
            continue;
        }

        if segments.len() <= 2 {
            let dir = (segments.len() == 2).then(|| segments[0].clone());
            let file_name = segments[segments.len() - 1].as_str();

            if file_name == MANIFEST_FILE {
                let text = read_limited(&mut entry, MAX_MANIFEST_BYTES)?.ok_or_else(|| {
                    ArchiveError::manifest_invalid(format!(
                        "{} exceeds {} bytes",
                        MANIFEST_FILE, MAX_MANIFEST_BYTES
                    ))
                })?;
                let text = String::from_utf8(text)
                    .map_err(|_| ArchiveError::manifest_invalid("manifest is not valid UTF-8"))?;
                scan.manifests.push((dir, text));
            } else if let Some(kind) = Document::from_file_name(file_name) {
                if let Some(text) = read_limited(&mut entry, MAX_DOCUMENT_BYTES)? {
                    scan.documents
                        .entry((dir, kind))
                        .or_insert_with(|| String::from_utf8_lossy(&text).into_owned());
                }
            }
        }

        scan.files.push(segments);
    }

    Ok(scan)
}

/// Split an entry path into normal segments, rejecting traversal and absolute paths
fn path_segments(path: &std::path::Path) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::malformed(format!(
                    "entry `{}` escapes the archive root",
                    path.display()
                )));
            }
        }
    }
    Ok(segments)
}

/// Read at most `limit` bytes; `None` when the entry is larger
fn read_limited<R: Read>(reader: &mut R, limit: u64) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut buf)
        .map_err(|e| ArchiveError::malformed(format!("cannot read archive entry: {}", e)))?;

    if buf.len() as u64 > limit {
        Ok(None)
    } else {
        Ok(Some(buf))
    }
}
