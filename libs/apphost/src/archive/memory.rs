use std::path::{Path, PathBuf};

use super::{ArchiveContent, ArchiveError, ArchiveItem, ClassDescriptor, WalkStats, visit_entry};

enum Stored {
    Raw { path: String, bytes: Vec<u8> },
    Class(ClassDescriptor),
}

/// Archive assembled in memory, mostly for tests and tooling.
///
/// Raw entries go through the same classification as real archives; pre-parsed classes
/// are handed out as they are.
pub struct InMemoryArchive {
    location: PathBuf,
    items: Vec<Stored>,
}

impl InMemoryArchive {
    #[must_use]
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            items: Vec::new(),
        }
    }

    /// Add a file at an archive-relative path.
    #[must_use]
    pub fn with_entry(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.items.push(Stored::Raw {
            path: path.into(),
            bytes: bytes.into(),
        });
        self
    }

    /// Add an already parsed class.
    #[must_use]
    pub fn with_class(mut self, class: ClassDescriptor) -> Self {
        self.items.push(Stored::Class(class));
        self
    }
}

impl ArchiveContent for InMemoryArchive {
    fn location(&self) -> &Path {
        &self.location
    }

    fn walk(&self, visit: &mut dyn FnMut(ArchiveItem<'_>)) -> Result<WalkStats, ArchiveError> {
        let mut stats = WalkStats::default();
        for item in &self.items {
            match item {
                Stored::Raw { path, bytes } => visit_entry(path, bytes, true, &mut stats, visit),
                Stored::Class(class) => {
                    stats.classes += 1;
                    visit(ArchiveItem::Class(class));
                }
            }
        }
        Ok(stats)
    }
}
