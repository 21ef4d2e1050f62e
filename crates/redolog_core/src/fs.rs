//! Segment file layout and naming.
//!
//! Segments live in one flat directory as pairs of files sharing a date
//! prefix and sequence number:
//!
//! ```text
//! YYYYMMDD_NNNNNNNN.buf[.gz]    data segment
//! YYYYMMDD_NNNNNNNN.ids[.gz]    id segment
//! ```
//!
//! The sequence resets to `00000001` on each new UTC day and increments by
//! one per rotation, so lexicographic name order equals chronological order
//! and the greatest name is always the current writable segment.

use crate::error::{JournalError, JournalResult};
use chrono::{NaiveDate, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

/// Mode for segment files.
pub const FILE_MODE: u32 = 0o664;
/// Mode for the buffer directory.
pub const DIR_MODE: u32 = 0o775;

const DATA_EXT: &str = "buf";
const IDS_EXT: &str = "ids";
const DATE_FORMAT: &str = "%Y%m%d";

/// Snapshot produced by one rotation: the freshly created current segment
/// plus every older segment eligible for replay.
#[derive(Debug)]
pub struct BufFileStat {
    /// Path of the new current data segment.
    pub new_data_path: PathBuf,
    /// Open handle for the new data segment.
    pub new_data_file: File,
    /// Path of the new current id segment.
    pub new_ids_path: PathBuf,
    /// Open handle for the new id segment.
    pub new_ids_file: File,
    /// Older data segments, sorted, oldest first.
    pub old_data_files: Vec<PathBuf>,
    /// Older id segments, sorted, oldest first.
    pub old_ids_files: Vec<PathBuf>,
}

/// Whether `name` carries a gzip suffix.
pub fn is_gz(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".gz")
}

/// Whether `name` is a data segment (`YYYYMMDD_NNNNNNNN.buf[.gz]`).
pub fn is_data_segment_name(name: &str) -> bool {
    matches_segment(name, DATA_EXT)
}

/// Whether `name` is an id segment (`YYYYMMDD_NNNNNNNN.ids[.gz]`).
pub fn is_ids_segment_name(name: &str) -> bool {
    matches_segment(name, IDS_EXT)
}

fn matches_segment(name: &str, ext: &str) -> bool {
    let base = name.strip_suffix(".gz").unwrap_or(name);
    let Some(stem) = base.strip_suffix(ext) else {
        return false;
    };
    let bytes = stem.as_bytes();
    // YYYYMMDD _ NNNNNNNN .
    bytes.len() == 18
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[8] == b'_'
        && bytes[9..17].iter().all(u8::is_ascii_digit)
        && bytes[17] == b'.'
}

/// Creates the buffer directory with mode 0775 if missing.
///
/// # Errors
///
/// Fails if the path exists and is not a directory, or on I/O errors.
pub fn prepare_dir(path: &Path) -> JournalResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(JournalError::config(format!(
            "`{}` exists and is not a directory",
            path.display()
        ))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(DIR_MODE);
            builder.create(path)?;
            // recursive create applies the umask; pin the exact mode
            #[cfg(unix)]
            fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
            info!(path = %path.display(), "created buffer directory");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Derives the next segment name from the previous one.
///
/// Same UTC day: the 8-digit sequence increments. New day: the sequence
/// resets to `00000001` under today's date. The extension (including any
/// `.gz`) is preserved, lowercased.
///
/// # Errors
///
/// Returns [`JournalError::InvalidSegmentName`] for a name without an
/// extension, with a malformed prefix, or with a non-numeric sequence.
pub fn generate_new_name(today: NaiveDate, old_name: &str) -> JournalResult<String> {
    let Some((stem, ext)) = old_name.split_once('.') else {
        return Err(JournalError::invalid_segment_name(
            old_name,
            "missing extension",
        ));
    };
    if stem.len() != 17 || stem.as_bytes()[8] != b'_' {
        return Err(JournalError::invalid_segment_name(
            old_name,
            "prefix is not YYYYMMDD_NNNNNNNN",
        ));
    }
    let date_part = &stem[..8];
    let seq_part = &stem[9..];
    let ext = ext.to_ascii_lowercase();

    let today_str = today.format(DATE_FORMAT).to_string();
    if today_str != date_part {
        return Ok(format!("{today_str}_00000001.{ext}"));
    }

    let seq: u64 = seq_part.parse().map_err(|_| {
        JournalError::invalid_segment_name(old_name, format!("sequence `{seq_part}` is not numeric"))
    })?;
    Ok(format!("{date_part}_{:08}.{ext}", seq + 1))
}

fn append_gz_suffix(name: String) -> String {
    if is_gz(&name) {
        name
    } else {
        name + ".gz"
    }
}

fn first_segment_name(today: NaiveDate, ext: &str) -> String {
    format!("{}_00000001.{ext}", today.format(DATE_FORMAT))
}

/// Creates and opens a segment file with mode 0664.
///
/// A nonzero `preallocate_bytes` is a best-effort hint; filesystems that
/// reject allocation are tolerated.
pub fn open_buf_file(path: &Path, preallocate_bytes: u64) -> JournalResult<File> {
    debug!(file = %path.display(), preallocate = preallocate_bytes, "open segment file");
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let file = options.open(path)?;

    if preallocate_bytes > 0 {
        if let Err(err) = file.allocate(preallocate_bytes) {
            debug!(
                file = %path.display(),
                error = %err,
                "preallocation rejected, continuing without"
            );
        }
    }
    Ok(file)
}

/// Creates the next segment pair and reports the directory's older
/// segments.
///
/// With `scan` (or on first run, when `prev` is `None`) the directory is
/// listed: well-formed segment names populate the old-file lists and the
/// lexicographically greatest pair seeds the new names; anything else is
/// warned about and ignored. Without `scan` the previous names come from
/// `prev` and the old-file lists stay empty; used when a consumer is
/// draining and the loader's view must not move.
///
/// Returns `Ok(None)` when a listed file vanishes before it can be stat'd
/// (a directory-cache race seen on macOS); the caller retries on the next
/// rotation.
pub fn prepare_new_buf_file(
    dir: &Path,
    prev: Option<(&Path, &Path)>,
    scan: bool,
    compress: bool,
    size_hint: u64,
) -> JournalResult<Option<BufFileStat>> {
    debug!(dir = %dir.display(), scan, compress, "prepare new segment pair");

    let mut old_data_files = Vec::new();
    let mut old_ids_files = Vec::new();
    let mut latest_data_name = String::new();
    let mut latest_ids_name = String::new();

    if scan || prev.is_none() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(file = ?file_name, "ignoring non-UTF-8 file name in buffer directory");
                continue;
            };
            let abs = dir.join(name);

            match fs::metadata(&abs) {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = name, "listed file vanished before stat, aborting scan");
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            }

            if is_data_segment_name(name) {
                if name > latest_data_name.as_str() {
                    latest_data_name = name.to_string();
                }
                old_data_files.push(abs);
            } else if is_ids_segment_name(name) {
                if name > latest_ids_name.as_str() {
                    latest_ids_name = name.to_string();
                }
                old_ids_files.push(abs);
            } else {
                warn!(file = name, "ignoring unknown file in buffer directory");
            }
        }
        // replay depends on oldest-first order; read_dir gives none
        old_data_files.sort();
        old_ids_files.sort();

        debug!(
            latest_data = latest_data_name,
            latest_ids = latest_ids_name,
            data_count = old_data_files.len(),
            ids_count = old_ids_files.len(),
            "scanned segment directory"
        );
    } else if let Some((prev_data, prev_ids)) = prev {
        for (path, target) in [
            (prev_data, &mut latest_data_name),
            (prev_ids, &mut latest_ids_name),
        ] {
            *target = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    JournalError::invalid_segment_name(
                        path.display().to_string(),
                        "current segment path has no valid file name",
                    )
                })?;
        }
    }

    let today = Utc::now().date_naive();
    let mut new_data_name = if latest_data_name.is_empty() {
        first_segment_name(today, DATA_EXT)
    } else {
        generate_new_name(today, &latest_data_name)?
    };
    let mut new_ids_name = if latest_ids_name.is_empty() {
        first_segment_name(today, IDS_EXT)
    } else {
        generate_new_name(today, &latest_ids_name)?
    };

    if compress {
        new_data_name = append_gz_suffix(new_data_name);
        new_ids_name = append_gz_suffix(new_ids_name);
    }

    let new_data_path = dir.join(&new_data_name);
    let new_ids_path = dir.join(&new_ids_name);
    let new_data_file = open_buf_file(&new_data_path, size_hint / 2)?;
    let new_ids_file = open_buf_file(&new_ids_path, 0)?;

    debug!(
        data_file = new_data_name,
        ids_file = new_ids_name,
        "created segment pair"
    );
    Ok(Some(BufFileStat {
        new_data_path,
        new_data_file,
        new_ids_path,
        new_ids_file,
        old_data_files,
        old_ids_files,
    }))
}
