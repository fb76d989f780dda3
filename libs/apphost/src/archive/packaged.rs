use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{ArchiveContent, ArchiveError, ArchiveItem, WalkStats, walk_zip};

/// A `.war` / `.jar` / `.ear` file.
#[derive(Debug, Clone)]
pub struct PackagedArchive {
    path: PathBuf,
}

impl PackagedArchive {
    /// Open `path` and check that it is a zip archive.
    ///
    /// # Errors
    /// `ArchiveError::Io` if the file cannot be opened, `ArchiveError::Zip` if it is not
    /// a zip archive.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let file = Self::reader(&path)?;
        zip::ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    fn reader(path: &Path) -> Result<BufReader<File>, ArchiveError> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|source| ArchiveError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl ArchiveContent for PackagedArchive {
    fn location(&self) -> &Path {
        &self.path
    }

    fn walk(&self, visit: &mut dyn FnMut(ArchiveItem<'_>)) -> Result<WalkStats, ArchiveError> {
        let mut stats = WalkStats::default();
        walk_zip(Self::reader(&self.path)?, None, &mut stats, visit).map_err(|source| {
            ArchiveError::Zip {
                path: self.path.clone(),
                source,
            }
        })?;
        tracing::debug!(
            archive = %self.path.display(),
            classes = stats.classes,
            descriptors = stats.descriptors,
            skipped = stats.skipped,
            "walked packaged archive"
        );
        Ok(stats)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::archive::open_archive;
    use crate::testing::{ClassFileBuilder, jar_bytes};

    #[test]
    fn open_and_walk_war_file() {
        let dir = tempfile::tempdir().unwrap();
        let war = dir.path().join("orders.war");
        std::fs::write(
            &war,
            jar_bytes(&[
                ("WEB-INF/beans.xml", b"<beans/>".to_vec()),
                ("WEB-INF/classes/a/B.class", ClassFileBuilder::new("a.B").build()),
            ]),
        )
        .unwrap();

        let archive = open_archive(&war).unwrap();
        assert_eq!(archive.default_name(), "orders");
        let mut n = 0;
        let stats = archive.walk(&mut |_| n += 1).unwrap();
        assert_eq!(n, 2);
        assert_eq!(stats.descriptors, 1);
        assert_eq!(stats.classes, 1);
    }

    #[test]
    fn non_zip_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.war");
        std::fs::write(&bogus, b"plain text").unwrap();
        assert!(matches!(
            PackagedArchive::open(&bogus),
            Err(ArchiveError::Zip { .. })
        ));
    }
}
