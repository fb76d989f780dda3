//! Read-only views over deployed archives.
//!
//! The sniffing pipeline only needs a flat walk over two kinds of items: parsed class
//! files and descriptor files. Everything else (static content, resources) is skipped by
//! the readers. Nested library jars (`WEB-INF/lib/*.jar`) are opened one level deep and
//! their entries reported as `<jar path>!/<entry>`.

pub mod classfile;
mod exploded;
mod memory;
mod packaged;

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

pub use classfile::{Annotation, AnnotationValue, ClassDescriptor, ClassFileError};
pub use exploded::ExplodedArchive;
pub use memory::InMemoryArchive;
pub use packaged::PackagedArchive;

/// One unit of archive content handed to the sniffers.
#[derive(Debug, Clone, Copy)]
pub enum ArchiveItem<'a> {
    Class(&'a ClassDescriptor),
    Descriptor { name: &'a str, content: &'a [u8] },
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{path}' is not a readable zip archive")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to walk '{path}'")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Counters of one walk, for logs and `inspect` output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WalkStats {
    pub classes: usize,
    pub descriptors: usize,
    pub skipped: usize,
}

/// Content of a deployed archive.
pub trait ArchiveContent: Send + Sync {
    /// Where the archive lives (directory, file, or a symbolic name for in-memory ones).
    fn location(&self) -> &Path;

    /// Feed every class and descriptor to `visit`.
    ///
    /// # Errors
    /// Returns `ArchiveError` when the archive itself cannot be read. Malformed class
    /// files or nested jars are logged and counted as skipped.
    fn walk(&self, visit: &mut dyn FnMut(ArchiveItem<'_>)) -> Result<WalkStats, ArchiveError>;

    /// Default deployment name: the file stem of the location.
    fn default_name(&self) -> String {
        self.location()
            .file_stem()
            .map_or_else(|| "ROOT".to_owned(), |s| s.to_string_lossy().into_owned())
    }
}

/// Open `path` as an exploded (directory) or packaged (zip) archive.
///
/// # Errors
/// `ArchiveError::NotFound` when the path does not exist, `ArchiveError::Zip` when a
/// file is not a zip archive.
pub fn open_archive(path: &Path) -> Result<Box<dyn ArchiveContent>, ArchiveError> {
    if !path.exists() {
        return Err(ArchiveError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        Ok(Box::new(ExplodedArchive::new(path)))
    } else {
        Ok(Box::new(PackagedArchive::open(path)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Class,
    Descriptor,
    NestedJar,
    Other,
}

const DESCRIPTOR_EXTENSIONS: [&str; 3] = [".xml", ".properties", ".json"];

/// Classify an archive-relative path (`/`-separated).
pub(crate) fn classify(path: &str) -> EntryKind {
    if path.ends_with('/') {
        return EntryKind::Other;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if path.ends_with(".class") {
        return if file_name == "module-info.class" {
            EntryKind::Other
        } else {
            EntryKind::Class
        };
    }
    if path.starts_with("WEB-INF/lib/") && path.ends_with(".jar") {
        return EntryKind::NestedJar;
    }
    let in_meta = path.starts_with("META-INF/") || path.starts_with("WEB-INF/");
    if in_meta
        && (path.starts_with("META-INF/services/")
            || DESCRIPTOR_EXTENSIONS.iter().any(|ext| path.ends_with(ext)))
    {
        return EntryKind::Descriptor;
    }
    EntryKind::Other
}

/// Dispatch one file entry. `nested` allows descending into library jars.
pub(crate) fn visit_entry(
    path: &str,
    bytes: &[u8],
    nested: bool,
    stats: &mut WalkStats,
    visit: &mut dyn FnMut(ArchiveItem<'_>),
) {
    match classify(path) {
        EntryKind::Class => match ClassDescriptor::parse(bytes) {
            Ok(class) => {
                stats.classes += 1;
                visit(ArchiveItem::Class(&class));
            }
            Err(err) => {
                stats.skipped += 1;
                tracing::warn!(entry = path, error = %err, "skipping malformed class file");
            }
        },
        EntryKind::Descriptor => {
            stats.descriptors += 1;
            visit(ArchiveItem::Descriptor {
                name: path,
                content: bytes,
            });
        }
        EntryKind::NestedJar if nested => {
            if let Err(err) = walk_zip(Cursor::new(bytes), Some(path), stats, visit) {
                stats.skipped += 1;
                tracing::warn!(entry = path, error = %err, "skipping unreadable library jar");
            }
        }
        EntryKind::NestedJar | EntryKind::Other => {}
    }
}

/// Walk a zip stream. With `prefix`, entries are named `<prefix>!/<entry>` and nested
/// jars are not descended into.
pub(crate) fn walk_zip<R: Read + std::io::Seek>(
    reader: R,
    prefix: Option<&str>,
    stats: &mut WalkStats,
    visit: &mut dyn FnMut(ArchiveItem<'_>),
) -> Result<(), zip::result::ZipError> {
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut buf = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_owned();
        if classify(&name) == EntryKind::Other {
            continue;
        }
        buf.clear();
        file.read_to_end(&mut buf)?;
        match prefix {
            Some(jar) => {
                // Inside a library jar only classes and META-INF descriptors matter.
                let display = format!("{jar}!/{name}");
                match classify(&name) {
                    EntryKind::Class | EntryKind::Descriptor => {
                        visit_named(&display, &name, &buf, stats, visit);
                    }
                    EntryKind::NestedJar | EntryKind::Other => {}
                }
            }
            None => visit_entry(&name, &buf, true, stats, visit),
        }
    }
    Ok(())
}

/// Like `visit_entry`, but reports the item under `display` while classifying `inner`.
fn visit_named(
    display: &str,
    inner: &str,
    bytes: &[u8],
    stats: &mut WalkStats,
    visit: &mut dyn FnMut(ArchiveItem<'_>),
) {
    match classify(inner) {
        EntryKind::Class => visit_entry(inner, bytes, false, stats, visit),
        EntryKind::Descriptor => {
            stats.descriptors += 1;
            visit(ArchiveItem::Descriptor {
                name: display,
                content: bytes,
            });
        }
        EntryKind::NestedJar | EntryKind::Other => {}
    }
}
