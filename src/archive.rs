//! Fetch and unpack vendor archives.
//!
//! A downloaded resource is detected as gzipped tar, plain tar, or zip from
//! its magic bytes, extracted (optionally filtered by filename suffix), and
//! normalized: the archive's single top-level folder is flattened into a
//! fresh `_attachments` directory at the destination.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} returned status {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("{path} is not a readable archive")]
    UnrecognizedFormat { path: PathBuf },

    #[error("archive {path} has no members")]
    EmptyArchive { path: PathBuf },

    #[error("malformed zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    TarGz,
    Tar,
    Zip,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Download `url` to a temporary file, then extract it into `dest` and
/// normalize the content into `dest/_attachments`.
///
/// An unrecognized archive format is unrecoverable for the caller: nothing
/// further can be installed from the resource, so the error is expected to
/// propagate all the way out.
pub async fn fetch_and_extract(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    suffix_filter: Option<&[String]>,
) -> Result<(), ArchiveError> {
    info!(url, dest = %dest.display(), "fetching archive");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| ArchiveError::Download {
            url: url.to_string(),
            source,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ArchiveError::DownloadStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|source| ArchiveError::Download {
            url: url.to_string(),
            source,
        })?;

    let mut archive = tempfile::NamedTempFile::new().map_err(io_err(dest))?;
    archive
        .write_all(&bytes)
        .map_err(io_err(archive.path()))?;
    // The downloaded archive lives only as long as this temp file.
    extract_archive(archive.path(), dest, suffix_filter)
}

/// Extract a local archive into `dest` and flatten its top-level folder into
/// a fresh `dest/_attachments`.
pub fn extract_archive(
    path: &Path,
    dest: &Path,
    suffix_filter: Option<&[String]>,
) -> Result<(), ArchiveError> {
    fs::create_dir_all(dest).map_err(io_err(dest))?;
    let format = detect_format(path)?;
    debug!(path = %path.display(), ?format, "detected archive format");
    let subfolder = match format {
        ArchiveFormat::TarGz | ArchiveFormat::Tar => {
            extract_tar(path, dest, format == ArchiveFormat::TarGz, suffix_filter)?
        }
        ArchiveFormat::Zip => extract_zip(path, dest, suffix_filter)?,
    };
    normalize_attachments(dest, &subfolder)
}

fn detect_format(path: &Path) -> Result<ArchiveFormat, ArchiveError> {
    let mut file = File::open(path).map_err(io_err(path))?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).map_err(io_err(path))?;
    if read >= 2 && magic[..2] == [0x1f, 0x8b] {
        return Ok(ArchiveFormat::TarGz);
    }
    if read >= 4 && &magic == b"PK\x03\x04" {
        return Ok(ArchiveFormat::Zip);
    }
    // Plain tar carries "ustar" at offset 257.
    let mut ustar = [0u8; 5];
    if file.seek(SeekFrom::Start(257)).is_ok()
        && file.read(&mut ustar).map_err(io_err(path))? == 5
        && &ustar == b"ustar"
    {
        return Ok(ArchiveFormat::Tar);
    }
    Err(ArchiveError::UnrecognizedFormat {
        path: path.to_path_buf(),
    })
}

fn matches_filter(name: &str, suffix_filter: Option<&[String]>) -> bool {
    match suffix_filter {
        Some(suffixes) => suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())),
        None => true,
    }
}

/// First path component of an archive member name.
fn top_component(name: &str) -> String {
    name.split('/').next().unwrap_or(name).to_string()
}

fn extract_tar(
    path: &Path,
    dest: &Path,
    gzipped: bool,
    suffix_filter: Option<&[String]>,
) -> Result<String, ArchiveError> {
    let file = File::open(path).map_err(io_err(path))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);

    let mut subfolder: Option<String> = None;
    for entry in archive.entries().map_err(io_err(path))? {
        let mut entry = entry.map_err(io_err(path))?;
        let name = entry
            .path()
            .map_err(io_err(path))?
            .to_string_lossy()
            .into_owned();
        // The first member names the archive's common root folder.
        if subfolder.is_none() {
            subfolder = Some(top_component(&name));
        }
        if !entry.header().entry_type().is_dir() && !matches_filter(&name, suffix_filter) {
            debug!(member = %name, "skipping filtered member");
            continue;
        }
        entry.unpack_in(dest).map_err(io_err(path))?;
    }

    subfolder.ok_or_else(|| ArchiveError::EmptyArchive {
        path: path.to_path_buf(),
    })
}

fn extract_zip(
    path: &Path,
    dest: &Path,
    suffix_filter: Option<&[String]>,
) -> Result<String, ArchiveError> {
    let zip_err = |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err(path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_err)?;
    if archive.is_empty() {
        return Err(ArchiveError::EmptyArchive {
            path: path.to_path_buf(),
        });
    }

    let mut subfolder: Option<String> = None;
    for index in 0..archive.len() {
        let mut member = archive.by_index(index).map_err(zip_err)?;
        let name = member.name().to_string();
        if subfolder.is_none() {
            subfolder = Some(top_component(&name));
        }
        let Some(relative) = member.enclosed_name() else {
            debug!(member = %name, "skipping member with unsafe path");
            continue;
        };
        let out_path = dest.join(relative);
        if member.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err(&out_path))?;
            continue;
        }
        if !matches_filter(&name, suffix_filter) {
            debug!(member = %name, "skipping filtered member");
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut out = File::create(&out_path).map_err(io_err(&out_path))?;
        std::io::copy(&mut member, &mut out).map_err(io_err(&out_path))?;
    }

    subfolder.ok_or_else(|| ArchiveError::EmptyArchive {
        path: path.to_path_buf(),
    })
}

/// Replace `dest/_attachments` with the contents of the extracted
/// `dest/{subfolder}`, flattening one level, then drop the emptied folder.
fn normalize_attachments(dest: &Path, subfolder: &str) -> Result<(), ArchiveError> {
    let attachments = dest.join("_attachments");
    // Best effort: there may be no previous installation to discard.
    let _ = fs::remove_dir_all(&attachments);
    fs::create_dir_all(&attachments).map_err(io_err(&attachments))?;

    let extracted = dest.join(subfolder);
    for entry in fs::read_dir(&extracted).map_err(io_err(&extracted))? {
        let entry = entry.map_err(io_err(&extracted))?;
        let target = attachments.join(entry.file_name());
        fs::rename(entry.path(), &target).map_err(io_err(&target))?;
    }
    fs::remove_dir_all(&extracted).map_err(io_err(&extracted))?;
    info!(dest = %attachments.display(), "archive installed");
    Ok(())
}
