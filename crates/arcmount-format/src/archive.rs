use std::fs::File;
use std::path::{Path, PathBuf};

use crate::detect::{self, Classification};
use crate::{Error, Result};

/// Everything the process knows about the archive file itself. Built once
/// during the probe stage and shared, immutably, by the indexing pass and
/// every serving-phase reader.
#[derive(Debug)]
pub struct ArchiveSpec {
    /// Path as given on the command line. Used for log messages only.
    pub path: PathBuf,
    /// Canonicalised absolute path. The mount host may change the working
    /// directory, so every open after startup goes through this.
    pub realpath: PathBuf,
    /// Size of the archive file in bytes.
    pub file_size: u64,
    /// What the probe decided the file is.
    pub classification: Classification,
    /// Decryption passphrase, if one was supplied or prompted for.
    pub password: Option<String>,
    /// Basename of the archive minus its last dot-suffix. Names the sole
    /// entry of raw archives and the default mount point.
    pub inner_name: String,
}

impl ArchiveSpec {
    /// Resolves and classifies the archive at `path`.
    pub fn probe(path: &Path, password: Option<String>) -> Result<ArchiveSpec> {
        let realpath = path
            .canonicalize()
            .map_err(|e| Error::CannotOpenArchive(e.to_string()))?;
        let mut file =
            File::open(&realpath).map_err(|e| Error::CannotOpenArchive(e.to_string()))?;
        let file_size = file
            .metadata()
            .map_err(|e| Error::CannotOpenArchive(e.to_string()))?
            .len();
        let classification = detect::classify(&mut file)?;

        Ok(ArchiveSpec {
            path: path.to_path_buf(),
            realpath,
            file_size,
            classification,
            password,
            inner_name: inner_name(path),
        })
    }

    /// True for raw (single synthetic entry) archives.
    pub fn is_raw(&self) -> bool {
        self.classification.is_raw()
    }

    /// Opens a fresh handle on the archive for a decoder to own.
    pub fn open_source(&self) -> Result<File> {
        File::open(&self.realpath).map_err(|e| Error::CannotOpenArchive(e.to_string()))
    }
}

/// The basename of `path` with its final dot-suffix removed; the basename
/// itself when there is no suffix. `/foo/bar.ext0.ext1` yields `bar.ext0`.
pub fn inner_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_name_strips_the_last_suffix_only() {
        assert_eq!(inner_name(Path::new("/foo/bar.ext0.ext1")), "bar.ext0");
        assert_eq!(inner_name(Path::new("archive.tar.gz")), "archive.tar");
        assert_eq!(inner_name(Path::new("plain")), "plain");
        assert_eq!(inner_name(Path::new("dir/file.zip")), "file");
    }
}
