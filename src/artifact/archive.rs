//! # File Sets
//!
//! In-memory view of the files inside an artifact, and deterministic
//! re-archiving.
//!
//! Artifacts are tar+gzip, tar, or a raw single-file blob. A raw blob exposes
//! one file that every path resolves to.

use crate::constants::{OCTET_STREAM_MEDIA_TYPE, TAR_GZIP_MEDIA_TYPE, TAR_MEDIA_TYPE};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Component, Path};
use thiserror::Error;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read archive: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive entry {0:?} escapes the archive root")]
    PathTraversal(String),
    #[error("file {0:?} not found in artifact")]
    FileNotFound(String),
    #[error("gzip stream does not contain a tar archive")]
    UnsupportedCompression,
}

/// Storage format of a file set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGzip,
    Tar,
    Raw,
}

impl ArchiveFormat {
    pub fn media_type(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGzip => TAR_GZIP_MEDIA_TYPE,
            ArchiveFormat::Tar => TAR_MEDIA_TYPE,
            ArchiveFormat::Raw => OCTET_STREAM_MEDIA_TYPE,
        }
    }
}

fn is_tar(data: &[u8]) -> bool {
    data.len() > 262 && &data[257..262] == b"ustar"
}

/// Normalize a relative path, rejecting anything leaving the root
fn normalize_path(raw: &str) -> Result<String, ArchiveError> {
    let mut parts = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathTraversal(raw.to_string()))
            }
        }
    }
    if parts.is_empty() {
        return Err(ArchiveError::FileNotFound(raw.to_string()));
    }
    Ok(parts.join("/"))
}

/// Files of an artifact, ordered by path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    format: ArchiveFormat,
    files: BTreeMap<String, Vec<u8>>,
}

impl FileSet {
    /// Build a tar+gzip file set from `(path, content)` pairs
    pub fn from_files<P: AsRef<str>, C: Into<Vec<u8>>>(
        files: impl IntoIterator<Item = (P, C)>,
    ) -> Result<Self, ArchiveError> {
        let mut set = Self {
            format: ArchiveFormat::TarGzip,
            files: BTreeMap::new(),
        };
        for (path, content) in files {
            set.files
                .insert(normalize_path(path.as_ref())?, content.into());
        }
        Ok(set)
    }

    /// Single raw file
    pub fn raw(content: impl Into<Vec<u8>>) -> Self {
        Self {
            format: ArchiveFormat::Raw,
            files: BTreeMap::from([(String::new(), content.into())]),
        }
    }

    /// Parse artifact bytes, detecting the format
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArchiveError> {
        if data.starts_with(&GZIP_MAGIC) {
            let mut decompressed = Vec::new();
            GzDecoder::new(data).read_to_end(&mut decompressed)?;
            if !is_tar(&decompressed) {
                return Err(ArchiveError::UnsupportedCompression);
            }
            return Self::read_tar(&decompressed, ArchiveFormat::TarGzip);
        }
        if is_tar(data) {
            return Self::read_tar(data, ArchiveFormat::Tar);
        }
        Ok(Self::raw(data))
    }

    fn read_tar(data: &[u8], format: ArchiveFormat) -> Result<Self, ArchiveError> {
        let mut files = BTreeMap::new();
        let mut archive = tar::Archive::new(data);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            if !entry.header().entry_type().is_file() {
                debug!(path, "Skipping non-regular archive entry");
                continue;
            }
            let path = normalize_path(&path)?;
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            files.insert(path, content);
        }
        Ok(Self { format, files })
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Content of `path`; a raw blob answers every path
    pub fn read(&self, path: &str) -> Result<&[u8], ArchiveError> {
        if self.format == ArchiveFormat::Raw {
            return self
                .files
                .values()
                .next()
                .map(Vec::as_slice)
                .ok_or_else(|| ArchiveError::FileNotFound(path.to_string()));
        }
        self.files
            .get(&normalize_path(path)?)
            .map(Vec::as_slice)
            .ok_or_else(|| ArchiveError::FileNotFound(path.to_string()))
    }

    /// Replace (or add) the content of `path`
    pub fn write(&mut self, path: &str, content: Vec<u8>) -> Result<(), ArchiveError> {
        let key = if self.format == ArchiveFormat::Raw {
            String::new()
        } else {
            normalize_path(path)?
        };
        self.files.insert(key, content);
        Ok(())
    }

    /// Serialize in the original format.
    ///
    /// Entries are sorted with zeroed timestamps and owners, so equal file
    /// sets always produce equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        match self.format {
            ArchiveFormat::Raw => Ok(self.files.values().next().cloned().unwrap_or_default()),
            ArchiveFormat::Tar => self.tar_bytes(),
            ArchiveFormat::TarGzip => {
                let tar = self.tar_bytes()?;
                let mut encoder = GzBuilder::new()
                    .mtime(0)
                    .write(Vec::new(), Compression::default());
                encoder.write_all(&tar)?;
                Ok(encoder.finish()?)
            }
        }
    }

    fn tar_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in &self.files {
            let mut header = tar::Header::new_ustar();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            builder.append_data(&mut header, path, content.as_slice())?;
        }
        Ok(builder.into_inner()?)
    }
}
