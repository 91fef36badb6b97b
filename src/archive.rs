//! Zip archiving of a finished download directory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// Deflate level used for every entry.
const COMPRESSION_LEVEL: i64 = 9;

/// What ended up in a finished archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Number of file entries written.
    pub files: usize,
    /// Number of directory entries written.
    pub directories: usize,
    /// Size of the archive on disk.
    pub archive_bytes: u64,
}

/// Returns the `.part` path an archive is written to before it is complete.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Zips everything below `source` into `dest` with paths relative to `source`.
///
/// The archive is written to `{dest}.part` and renamed once the zip writer is
/// finished and flushed, so `dest` only ever holds a complete archive. The
/// part file is removed on failure.
///
/// # Errors
///
/// Returns an error if `source` cannot be walked or read, or if the archive
/// cannot be written.
pub fn zip_directory(source: &Path, dest: &Path) -> Result<ArchiveSummary> {
    let part = part_path(dest);
    let written = write_archive(source, &part).and_then(|counts| {
        std::fs::rename(&part, dest)?;
        Ok(counts)
    });
    match written {
        Ok((files, directories)) => {
            let archive_bytes = std::fs::metadata(dest)?.len();
            Ok(ArchiveSummary {
                files,
                directories,
                archive_bytes,
            })
        }
        Err(e) => {
            let _ = std::fs::remove_file(&part);
            Err(e)
        }
    }
}

/// Async wrapper running [`zip_directory`] on the blocking pool.
///
/// # Errors
///
/// Returns the archiving error, or [`Error::Archive`] if the blocking task
/// panicked.
pub async fn zip_directory_async(source: PathBuf, dest: PathBuf) -> Result<ArchiveSummary> {
    tokio::task::spawn_blocking(move || zip_directory(&source, &dest))
        .await
        .map_err(|e| Error::Archive(format!("archive task failed: {e}")))?
}

fn write_archive(source: &Path, part: &Path) -> Result<(usize, usize)> {
    let file = File::create(part)?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .large_file(true);

    let mut files = 0;
    let mut directories = 0;

    for entry in WalkDir::new(source).min_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| Error::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Archive(e.to_string()))?;
        let name = archive_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
            directories += 1;
        } else {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())?;
            std::io::copy(&mut input, &mut zip)?;
            files += 1;
        }
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;

    Ok((files, directories))
}

/// Zip entry names always use `/`, whatever the platform separator is.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
