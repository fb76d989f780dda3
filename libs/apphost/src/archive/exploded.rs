use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{ArchiveContent, ArchiveError, ArchiveItem, EntryKind, WalkStats, classify, visit_entry};

/// An archive unpacked into a directory.
#[derive(Debug, Clone)]
pub struct ExplodedArchive {
    root: PathBuf,
}

impl ExplodedArchive {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveContent for ExplodedArchive {
    fn location(&self) -> &Path {
        &self.root
    }

    fn walk(&self, visit: &mut dyn FnMut(ArchiveItem<'_>)) -> Result<WalkStats, ArchiveError> {
        let mut stats = WalkStats::default();
        // Sorted so that scans of the same directory are reproducible.
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|source| ArchiveError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if classify(&relative) == EntryKind::Other {
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(|source| ArchiveError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            visit_entry(&relative, &bytes, true, &mut stats, visit);
        }
        tracing::debug!(
            archive = %self.root.display(),
            classes = stats.classes,
            descriptors = stats.descriptors,
            skipped = stats.skipped,
            "walked exploded archive"
        );
        Ok(stats)
    }
}
