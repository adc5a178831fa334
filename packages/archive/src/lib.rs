#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zip archive handling for uploaded datasets.
//!
//! A dataset version is uploaded as a zip archive holding one or more
//! shapefiles. Before ingestion the archive is [`validate`]d, stripped of
//! hidden entries by [`sanitize`], and unpacked with [`extract`].
//!
//! An entry is hidden when any of its path segments starts with `.` or
//! `__`, which covers dotfiles, `__MACOSX` resource forks, and editor
//! temp files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

/// Errors from archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The file is not a readable zip archive.
    #[error("{path} is not a valid ZIP file: {message}")]
    InvalidArchive {
        /// Archive path.
        path: String,
        /// Reason reported by the zip reader.
        message: String,
    },

    /// An entry failed its checksum or could not be decompressed.
    #[error("{path} is corrupted at entry {entry}: {message}")]
    CorruptArchive {
        /// Archive path.
        path: String,
        /// Name (or index) of the offending entry.
        entry: String,
        /// Reason reported by the zip reader.
        message: String,
    },

    /// The archive holds no `.shp` entry.
    #[error("{0} does not contain a shapefile (.shp)")]
    MissingShapefile(String),

    /// I/O error while reading or rewriting the archive.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Whether any path segment of a zip entry name is hidden.
#[must_use]
pub fn is_hidden_entry(name: &str) -> bool {
    hidden_root(name).is_some()
}

/// Returns the entry path up to and including its first hidden segment.
///
/// Every entry below a hidden directory shares that directory as its root,
/// so a whole `__MACOSX/` tree counts as a single removal.
fn hidden_root(name: &str) -> Option<String> {
    let mut root = Vec::new();
    for segment in name.split(['/', '\\']) {
        if segment.is_empty() || segment == "." {
            continue;
        }
        root.push(segment);
        if segment.starts_with('.') || segment.starts_with("__") {
            return Some(root.join("/"));
        }
    }
    None
}

fn is_shapefile_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
}

fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::InvalidArchive {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Checks that an archive is a readable zip, that every entry passes its
/// checksum, and that at least one `.shp` entry exists.
///
/// # Errors
///
/// * [`ArchiveError::InvalidArchive`] if the file is not a zip archive.
/// * [`ArchiveError::CorruptArchive`] if any entry fails to decompress or
///   its CRC does not match.
/// * [`ArchiveError::MissingShapefile`] if no entry ends in `.shp`.
pub fn validate(path: &Path) -> Result<(), ArchiveError> {
    let mut archive = open(path)?;
    let mut shapefile_found = false;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::CorruptArchive {
                path: path.display().to_string(),
                entry: format!("#{i}"),
                message: e.to_string(),
            })?;

        let name = entry.name().to_string();

        // The CRC is only checked once the entry is read to the end.
        io::copy(&mut entry, &mut io::sink()).map_err(|e| ArchiveError::CorruptArchive {
            path: path.display().to_string(),
            entry: name.clone(),
            message: e.to_string(),
        })?;

        if is_shapefile_name(&name) {
            shapefile_found = true;
        }
    }

    if !shapefile_found {
        return Err(ArchiveError::MissingShapefile(path.display().to_string()));
    }

    log::debug!("{} is a valid shapefile archive", path.display());

    Ok(())
}

/// Removes every hidden entry from the archive, rewriting it in place.
///
/// Returns the number of hidden files and directories removed; a hidden
/// directory counts once no matter how many entries it holds. Entries that
/// are kept are copied without recompression, so their bytes are
/// untouched. When nothing is hidden the file is not rewritten at all.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or the sanitized copy
/// cannot be written.
pub fn sanitize(path: &Path) -> Result<usize, ArchiveError> {
    let mut archive = open(path)?;

    let hidden_roots: BTreeSet<String> = archive.file_names().filter_map(hidden_root).collect();

    if hidden_roots.is_empty() {
        return Ok(0);
    }

    for root in &hidden_roots {
        log::debug!("Removing hidden entry: {root}");
    }

    let tmp_path = path.with_extension("zip.tmp");
    let tmp_file = File::create(&tmp_path).map_err(|e| ArchiveError::Io {
        path: tmp_path.display().to_string(),
        source: e,
    })?;

    let mut writer = zip::ZipWriter::new(tmp_file);

    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| ArchiveError::CorruptArchive {
                path: path.display().to_string(),
                entry: format!("#{i}"),
                message: e.to_string(),
            })?;

        if is_hidden_entry(entry.name()) {
            continue;
        }

        let name = entry.name().to_string();
        writer
            .raw_copy_file(entry)
            .map_err(|e| ArchiveError::CorruptArchive {
                path: path.display().to_string(),
                entry: name,
                message: e.to_string(),
            })?;
    }

    writer.finish().map_err(|e| ArchiveError::Io {
        path: tmp_path.display().to_string(),
        source: io::Error::other(e),
    })?;

    drop(archive);

    std::fs::rename(&tmp_path, path).map_err(|e| ArchiveError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    log::info!(
        "Sanitized {}: removed {} hidden entries",
        path.display(),
        hidden_roots.len()
    );

    Ok(hidden_roots.len())
}

/// Lists the `.shp` entries of the archive, skipping hidden ones.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidArchive`] if the file is not a zip
/// archive.
pub fn list_shapefiles(path: &Path) -> Result<Vec<String>, ArchiveError> {
    let archive = open(path)?;
    Ok(archive
        .file_names()
        .filter(|name| is_shapefile_name(name) && !is_hidden_entry(name))
        .map(str::to_string)
        .collect())
}

/// Unpacks every non-hidden entry into `dest_dir`.
///
/// Entries whose names would escape `dest_dir` are skipped. Returns the
/// paths of the extracted files.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or a file cannot be
/// written.
pub fn extract(path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut archive = open(path)?;

    log::info!("Extracting {} -> {}", path.display(), dest_dir.display());

    std::fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::Io {
        path: dest_dir.display().to_string(),
        source: e,
    })?;

    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::CorruptArchive {
                path: path.display().to_string(),
                entry: format!("#{i}"),
                message: e.to_string(),
            })?;

        if is_hidden_entry(entry.name()) {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            log::warn!("  skipping unsafe entry name: {}", entry.name());
            continue;
        };
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ArchiveError::Io {
                path: target.display().to_string(),
                source: e,
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let mut out = File::create(&target).map_err(|e| ArchiveError::Io {
            path: target.display().to_string(),
            source: e,
        })?;
        io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::Io {
            path: target.display().to_string(),
            source: e,
        })?;

        extracted.push(target);
    }

    log::info!("  extracted {} files", extracted.len());

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])], method: zip::CompressionMethod) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().compression_method(method);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = open(path).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cartoforge_archive_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn hidden_entries_are_detected_by_any_segment() {
        assert!(is_hidden_entry(".hidden"));
        assert!(is_hidden_entry("__MACOSX/._x"));
        assert!(is_hidden_entry("folder/.hidden2"));
        assert!(is_hidden_entry("data/__pycache__/x.pyc"));
        assert!(!is_hidden_entry("file.shp"));
        assert!(!is_hidden_entry("folder/communes.shp"));
        assert!(!is_hidden_entry("./file.shp"));
    }

    #[test]
    fn sanitize_removes_hidden_roots_and_is_idempotent() {
        let tmp = scratch_dir("sanitize");
        let zip_path = tmp.join("dataset.zip");
        write_zip(
            &zip_path,
            &[
                ("file.shp", b"shape bytes"),
                (".hidden", b"x"),
                ("__MACOSX/._x", b"resource fork"),
                ("folder/.hidden2", b"y"),
            ],
            zip::CompressionMethod::Deflated,
        );

        assert_eq!(sanitize(&zip_path).unwrap(), 3);
        assert_eq!(entry_names(&zip_path), vec!["file.shp".to_string()]);
        assert_eq!(sanitize(&zip_path).unwrap(), 0);

        let dest = tmp.join("out");
        let files = extract(&zip_path, &dest).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(dest.join("file.shp")).unwrap(), b"shape bytes");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn hidden_directory_counts_once() {
        let tmp = scratch_dir("hidden_dir");
        let zip_path = tmp.join("dataset.zip");
        write_zip(
            &zip_path,
            &[
                ("a.shp", b"a"),
                ("__MACOSX/._a.shp", b"1"),
                ("__MACOSX/._a.dbf", b"2"),
                ("__MACOSX/sub/._b", b"3"),
            ],
            zip::CompressionMethod::Stored,
        );

        assert_eq!(sanitize(&zip_path).unwrap(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_accepts_shapefile_archives() {
        let tmp = scratch_dir("validate_ok");
        let zip_path = tmp.join("dataset.zip");
        write_zip(
            &zip_path,
            &[("communes.shp", b"shp"), ("communes.dbf", b"dbf")],
            zip::CompressionMethod::Deflated,
        );

        validate(&zip_path).unwrap();
        assert_eq!(list_shapefiles(&zip_path).unwrap(), vec!["communes.shp"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_non_zip_files() {
        let tmp = scratch_dir("validate_invalid");
        let zip_path = tmp.join("dataset.zip");
        std::fs::write(&zip_path, b"definitely not a zip file").unwrap();

        assert!(matches!(
            validate(&zip_path),
            Err(ArchiveError::InvalidArchive { .. })
        ));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_rejects_archives_without_shapefiles() {
        let tmp = scratch_dir("validate_missing");
        let zip_path = tmp.join("dataset.zip");
        write_zip(
            &zip_path,
            &[("readme.txt", b"no shapes here")],
            zip::CompressionMethod::Deflated,
        );

        assert!(matches!(
            validate(&zip_path),
            Err(ArchiveError::MissingShapefile(_))
        ));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_detects_checksum_mismatch() {
        let tmp = scratch_dir("validate_corrupt");
        let zip_path = tmp.join("dataset.zip");
        let payload = b"payload that will be tampered with";
        write_zip(
            &zip_path,
            &[("communes.shp", payload)],
            zip::CompressionMethod::Stored,
        );

        let mut bytes = std::fs::read(&zip_path).unwrap();
        let offset = bytes
            .windows(payload.len())
            .position(|w| w == payload)
            .unwrap();
        bytes[offset] ^= 0xFF;
        std::fs::write(&zip_path, &bytes).unwrap();

        assert!(matches!(
            validate(&zip_path),
            Err(ArchiveError::CorruptArchive { .. })
        ));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
