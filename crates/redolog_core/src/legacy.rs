//! Cross-segment replay of legacy data, filtered by committed ids.
//!
//! The loader owns the lists of replayable segment files and a committed-id
//! set. On each replay pass it first merges every id file into the set,
//! then walks the data files oldest-first, yielding only records whose id
//! is not committed. The newest file in the list is always skipped: it is
//! the segment the engine is still writing.

use crate::error::{JournalError, JournalResult};
use crate::fs::is_gz;
use crate::idset::TtlSet;
use crate::sync::Shutdown;
use parking_lot::Mutex;
use redolog_codec::{DataDecoder, DataRecord, IdsDecoder};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Replays legacy segments and tracks committed ids.
///
/// Thread-safe: id operations go through the set's own shard locks, the
/// replay cursor through one internal mutex. In practice a single consumer
/// drains while producers feed the id side.
pub struct LegacyLoader {
    ids: TtlSet,
    state: Mutex<ReplayState>,
}

struct ReplayState {
    data_files: Vec<PathBuf>,
    ids_files: Vec<PathBuf>,
    /// The previous pass finished (or never ran); the next `load` must
    /// re-merge ids and restart the cursor.
    need_reload: bool,
    /// `reset` installed a non-empty file list since the last pass.
    ready_reload: bool,
    /// Index of the next data file to open.
    file_idx: usize,
    /// One less than the list length: the final entry is the live segment.
    files_len: usize,
    decoder: Option<DataDecoder>,
}

impl LegacyLoader {
    /// Creates a loader over the given replayable segment lists.
    ///
    /// The loader owns a fresh committed-id set with the given TTL; the
    /// sweeper stops when `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the id set's sweeper thread cannot be spawned.
    pub fn new(
        shutdown: Shutdown,
        data_files: Vec<PathBuf>,
        ids_files: Vec<PathBuf>,
        committed_id_ttl: Duration,
    ) -> JournalResult<Self> {
        debug!(
            data_count = data_files.len(),
            ids_count = ids_files.len(),
            "new legacy loader"
        );
        let ready_reload = !data_files.is_empty();
        Ok(Self {
            ids: TtlSet::new(shutdown, committed_id_ttl)?,
            state: Mutex::new(ReplayState {
                data_files,
                ids_files,
                need_reload: true,
                ready_reload,
                file_idx: 0,
                files_len: 0,
                decoder: None,
            }),
        })
    }

    /// Records `id` as committed.
    pub fn add_id(&self, id: i64) {
        self.ids.add(id);
    }

    /// Consumes `id` from the committed set if present and unexpired.
    pub fn check_and_remove(&self, id: i64) -> bool {
        self.ids.check_and_remove(id)
    }

    /// Approximate size of the committed-id set.
    pub fn ids_len(&self) -> usize {
        self.ids.len()
    }

    /// Replaces the replayable file lists after a rotation.
    pub fn reset(&self, data_files: Vec<PathBuf>, ids_files: Vec<PathBuf>) {
        let mut state = self.state.lock();
        debug!(
            data_count = data_files.len(),
            ids_count = ids_files.len(),
            "reset legacy loader"
        );
        state.ready_reload = !data_files.is_empty();
        state.data_files = data_files;
        state.ids_files = ids_files;
    }

    /// Yields the next uncommitted legacy record, or `Ok(None)` when the
    /// replayable segments are exhausted.
    ///
    /// Broken files are logged and skipped; replay makes progress on
    /// whatever remains readable.
    pub fn load(&self) -> JournalResult<Option<DataRecord>> {
        let mut state = self.state.lock();

        if state.need_reload {
            if !state.ready_reload {
                return Ok(None);
            }
            state.ready_reload = false;

            let mut sink = &self.ids;
            if let Err(err) = load_ids_from(&state.ids_files, &mut sink) {
                error!(error = %err, "loading committed ids was partial, replaying anyway");
            }

            state.files_len = state.data_files.len().saturating_sub(1);
            state.file_idx = 0;
            state.need_reload = false;
        }

        'next_file: loop {
            if state.decoder.is_none() {
                if state.file_idx >= state.files_len {
                    debug!("all legacy data files finished");
                    state.need_reload = true;
                    return Ok(None);
                }
                let path = state.data_files[state.file_idx].clone();
                state.file_idx += 1;

                let file = match File::open(&path) {
                    Ok(file) => file,
                    Err(err) => {
                        error!(file = %path.display(), error = %err, "cannot open data segment, skipping");
                        continue 'next_file;
                    }
                };
                let compress = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_gz);
                match DataDecoder::new(file, compress) {
                    Ok(decoder) => {
                        debug!(file = %path.display(), "replaying data segment");
                        state.decoder = Some(decoder);
                    }
                    Err(err) => {
                        error!(file = %path.display(), error = %err, "cannot decode data segment, skipping");
                        continue 'next_file;
                    }
                }
            }

            loop {
                match state.decoder.as_mut().expect("decoder opened above").read() {
                    Ok(Some(record)) => {
                        if self.ids.check_and_remove(record.id) {
                            // already consumed downstream
                            continue;
                        }
                        return Ok(Some(record));
                    }
                    Ok(None) => {
                        state.decoder = None;
                        continue 'next_file;
                    }
                    Err(err) => {
                        error!(error = %err, "data segment broken, skipping the rest of it");
                        state.decoder = None;
                        continue 'next_file;
                    }
                }
            }
        }
    }

    /// Merges the contents of every id file into `set`.
    ///
    /// # Errors
    ///
    /// Per-file failures do not stop processing; they are joined into one
    /// [`JournalError::LoadIds`].
    pub fn load_all_ids(&self, set: &mut impl Extend<i64>) -> JournalResult<()> {
        let state = self.state.lock();
        load_ids_from(&state.ids_files, set)
    }

    /// Scans every id file and returns the largest committed id, or 0 when
    /// there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if an id file cannot be opened; decode failures are
    /// logged and skipped.
    pub fn load_max_id(&self) -> JournalResult<i64> {
        let state = self.state.lock();
        let mut max_id = 0i64;
        for path in &state.ids_files {
            let file = File::open(path)?;
            let mut decoder = IdsDecoder::new(file, path_is_gz(path))?;
            match decoder.load_max() {
                Ok(Some(id)) => max_id = max_id.max(id),
                Ok(None) => {}
                Err(err) => {
                    error!(file = %path.display(), error = %err, "cannot read id segment, skipping");
                }
            }
        }
        debug!(max_id, "loaded max committed id");
        Ok(max_id)
    }

    /// Deletes replayed segments, keeping the newest file of each list, and
    /// closes the replay handle so the next pass reopens cleanly.
    pub fn clean(&self) {
        let mut state = self.state.lock();

        if state.data_files.len() > 1 {
            let split_at = state.data_files.len() - 1;
            let keep = state.data_files.split_off(split_at);
            remove_files(&state.data_files);
            state.data_files = keep;
        }
        if state.ids_files.len() > 1 {
            let split_at = state.ids_files.len() - 1;
            let keep = state.ids_files.split_off(split_at);
            remove_files(&state.ids_files);
            state.ids_files = keep;
        }

        state.decoder = None;
        debug!("cleaned legacy segments");
    }
}

impl std::fmt::Debug for LegacyLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LegacyLoader")
            .field("data_files", &state.data_files)
            .field("ids_files", &state.ids_files)
            .field("ids_len", &self.ids.len())
            .finish_non_exhaustive()
    }
}

fn path_is_gz(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(is_gz)
}

fn load_ids_from(files: &[PathBuf], set: &mut impl Extend<i64>) -> JournalResult<()> {
    let mut failures = Vec::new();
    for path in files {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                failures.push(format!("open `{}`: {err}", path.display()));
                continue;
            }
        };
        let mut decoder = match IdsDecoder::new(file, path_is_gz(path)) {
            Ok(decoder) => decoder,
            Err(err) => {
                failures.push(format!("decode `{}`: {err}", path.display()));
                continue;
            }
        };
        if let Err(err) = decoder.read_all_into(set) {
            failures.push(format!("read `{}`: {err}", path.display()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(JournalError::load_ids(failures.join("; ")))
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => info!(file = %path.display(), "removed replayed segment"),
            Err(err) => {
                error!(file = %path.display(), error = %err, "cannot remove replayed segment");
            }
        }
    }
}
