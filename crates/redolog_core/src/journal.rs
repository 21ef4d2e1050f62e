//! The journal engine: writer API, periodic flush, rotation, and the legacy
//! replay handoff.
//!
//! Lock order, outermost first: rotate lock → journal RwLock write → legacy
//! lock (try only) → loader internals. The two outer locks are non-blocking
//! flag locks; a rotation that loses the race simply returns, and a rotation
//! that cannot take the legacy lock (a consumer is draining) still creates
//! the successor segment without disturbing the loader's view.

use crate::config::Config;
use crate::error::{JournalError, JournalResult};
use crate::fs::{prepare_dir, prepare_new_buf_file, BufFileStat};
use crate::legacy::LegacyLoader;
use crate::sync::{Shutdown, TryLock};
use parking_lot::{Mutex, RwLock};
use redolog_codec::{DataEncoder, DataRecord, IdsEncoder};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A durable append-only redo-log journal.
///
/// Producers call [`write_data`](Self::write_data) and
/// [`write_id`](Self::write_id) concurrently; background tasks flush and
/// rotate segments. A consumer takes the legacy lock with
/// [`lock_legacy`](Self::lock_legacy) and drains
/// [`load_legacy_buf`](Self::load_legacy_buf) to replay every record not yet
/// committed.
///
/// # Example
///
/// ```no_run
/// use redolog_core::{Config, Journal};
/// use redolog_codec::{DataRecord, Value};
/// use std::sync::Arc;
///
/// let journal = Arc::new(Journal::new(
///     Config::new().buf_dir_path("/var/redolog/pipeline"),
/// )?);
/// journal.start()?;
///
/// journal.write_data(&DataRecord::new(1, vec![("msg".into(), Value::text("hi"))]))?;
/// journal.write_id(1)?; // downstream finished record 1
///
/// if journal.lock_legacy() {
///     while let Some(_record) = journal.load_legacy_buf()? {
///         // re-process the record
///     }
/// }
/// journal.close();
/// # Ok::<(), redolog_core::JournalError>(())
/// ```
pub struct Journal {
    config: Config,
    shutdown: Shutdown,
    /// The journal lock: readers are writers/consumers, writers are flush,
    /// rotation, and close.
    state: RwLock<State>,
    rotate_lock: TryLock,
    legacy_lock: TryLock,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// How often `start` retries an initial rotation that installed nothing.
const INITIAL_ROTATE_ATTEMPTS: usize = 3;

/// Current writable segment, by path. Handles live inside the encoders.
struct CurrentSegment {
    data_path: PathBuf,
    ids_path: PathBuf,
}

struct State {
    current: Option<CurrentSegment>,
    data_enc: Mutex<Option<DataEncoder>>,
    ids_enc: Mutex<Option<IdsEncoder>>,
    legacy: Option<Arc<LegacyLoader>>,
    last_rotate_at: Instant,
}

impl Journal {
    /// Creates a journal in the stopped state.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Config`] for invalid options.
    pub fn new(config: Config) -> JournalResult<Self> {
        config.validate()?;
        info!(
            name = %config.name,
            dir = %config.buf_dir_path.display(),
            buf_size_bytes = config.buf_size_bytes,
            compress = config.compress,
            aggressive_gc = config.aggressive_gc,
            flush_interval = ?config.flush_interval,
            rotate_duration = ?config.rotate_duration,
            rotate_check_interval = ?config.rotate_check_interval,
            committed_id_ttl = ?config.committed_id_ttl,
            "new journal"
        );
        Ok(Self {
            config,
            shutdown: Shutdown::new(),
            state: RwLock::new(State {
                current: None,
                data_enc: Mutex::new(None),
                ids_enc: Mutex::new(None),
                legacy: None,
                last_rotate_at: Instant::now(),
            }),
            rotate_lock: TryLock::new(),
            legacy_lock: TryLock::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Prepares the buffer directory, performs the initial rotation, and
    /// launches the flush and rotation background tasks.
    ///
    /// On success the current segment pair and the legacy loader are
    /// installed, so writers are admitted immediately.
    ///
    /// # Errors
    ///
    /// Fails when the buffer directory cannot be created or written, or the
    /// initial rotation cannot install the first segment pair.
    pub fn start(self: &Arc<Self>) -> JournalResult<()> {
        prepare_dir(&self.config.buf_dir_path)?;

        // the directory scan can abort cleanly on the vanishing-file race,
        // leaving no segment pair installed; writers gate on that state, so
        // retry here instead of waiting for the rotate trigger's next tick
        let mut ready = false;
        for _ in 0..INITIAL_ROTATE_ATTEMPTS {
            self.rotate()?;
            let state = self.state.read();
            if state.current.is_some() && state.legacy.is_some() {
                ready = true;
                break;
            }
        }
        if !ready {
            return Err(JournalError::initial_rotation(
                "no segment pair installed: the directory scan kept aborting \
                 or the legacy lock is already held",
            ));
        }

        let flusher = Arc::clone(self);
        let flush_handle = std::thread::Builder::new()
            .name(format!("{}-flush", self.config.name))
            .spawn(move || flusher.run_flush_trigger())?;

        let rotator = Arc::clone(self);
        let rotate_handle = std::thread::Builder::new()
            .name(format!("{}-rotate", self.config.name))
            .spawn(move || rotator.run_rotate_trigger())?;

        self.threads.lock().extend([flush_handle, rotate_handle]);
        Ok(())
    }

    /// Stops background tasks, then flushes and finalizes the current
    /// encoders. Idempotent.
    pub fn close(&self) {
        info!(name = %self.config.name, "close journal");
        self.shutdown.cancel();
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("background task panicked");
            }
        }

        let state = self.state.write();
        if let Err(err) = close_encoders(&state) {
            error!(error = %err, "flush on close failed");
        }
    }

    /// Buffers one data record to the current segment.
    ///
    /// If the record's id sits unexpired in the committed set, the write is
    /// silently dropped as a duplicate. The set entry is consumed by the
    /// check, so a later re-issue of the same id is accepted again.
    ///
    /// # Errors
    ///
    /// [`JournalError::NotStarted`] before [`start`](Self::start); encoder
    /// errors surface directly with no retry.
    pub fn write_data(&self, record: &DataRecord) -> JournalResult<()> {
        let state = self.state.read();
        let legacy = state.legacy.as_ref().ok_or(JournalError::NotStarted)?;

        if legacy.check_and_remove(record.id) {
            debug!(id = record.id, "dropped duplicate of committed record");
            return Ok(());
        }

        let mut enc = state.data_enc.lock();
        enc.as_mut()
            .ok_or(JournalError::NotStarted)?
            .write(record)?;
        Ok(())
    }

    /// Records `id` as committed and buffers it to the current id segment.
    ///
    /// # Errors
    ///
    /// Same as [`write_data`](Self::write_data).
    pub fn write_id(&self, id: i64) -> JournalResult<()> {
        let state = self.state.read();
        let legacy = state.legacy.as_ref().ok_or(JournalError::NotStarted)?;
        legacy.add_id(id);

        let mut enc = state.ids_enc.lock();
        enc.as_mut().ok_or(JournalError::NotStarted)?.write(id)?;
        Ok(())
    }

    /// Drains both encoder buffers to disk.
    ///
    /// # Errors
    ///
    /// Per-encoder failures are joined into one [`JournalError::Flush`].
    pub fn flush(&self) -> JournalResult<()> {
        let state = self.state.write();
        flush_encoders(&state)
    }

    /// Closes the current segment, scans or derives the successor, swaps in
    /// fresh encoders, and (when the legacy lock is free) rebuilds the
    /// legacy loader's view of replayable segments.
    ///
    /// Concurrent calls are idempotent: losing the rotation race returns
    /// `Ok` immediately, as does observing shutdown.
    ///
    /// # Errors
    ///
    /// Failures from segment preparation or encoder construction; the next
    /// rotation tick retries.
    pub fn rotate(&self) -> JournalResult<()> {
        if !self.rotate_lock.try_lock() {
            return Ok(());
        }
        let result = self.rotate_locked();
        self.rotate_lock.unlock();
        result
    }

    fn rotate_locked(&self) -> JournalResult<()> {
        let mut state = self.state.write();
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        debug!(name = %self.config.name, "starting rotation");

        close_encoders(&state)?;
        state.last_rotate_at = Instant::now();

        let prev = state
            .current
            .as_ref()
            .map(|c| (c.data_path.as_path(), c.ids_path.as_path()));

        let stat = if self.legacy_lock.try_lock() {
            debug!("acquired legacy lock, rescanning segment directory");
            let prepared = prepare_new_buf_file(
                &self.config.buf_dir_path,
                prev,
                true,
                self.config.compress,
                self.config.buf_size_bytes,
            );
            let stat = match prepared {
                Ok(Some(stat)) => stat,
                Ok(None) => {
                    self.legacy_lock.unlock();
                    warn!("segment scan raced with a file removal, retrying next tick");
                    return Ok(());
                }
                Err(err) => {
                    self.legacy_lock.unlock();
                    return Err(err);
                }
            };
            if let Err(err) = self.refresh_legacy_loader(&mut state, &stat) {
                self.legacy_lock.unlock();
                return Err(err);
            }
            self.legacy_lock.unlock();
            stat
        } else {
            debug!("legacy lock busy, creating successor segment only");
            match prepare_new_buf_file(
                &self.config.buf_dir_path,
                prev,
                false,
                self.config.compress,
                self.config.buf_size_bytes,
            )? {
                Some(stat) => stat,
                None => return Ok(()),
            }
        };

        let BufFileStat {
            new_data_path,
            new_data_file,
            new_ids_path,
            new_ids_file,
            ..
        } = stat;

        // adopting the new encoders drops the previous ones, closing the
        // prior segment handles
        *state.data_enc.lock() = Some(DataEncoder::new(new_data_file, self.config.compress)?);
        *state.ids_enc.lock() = Some(IdsEncoder::new(new_ids_file, self.config.compress)?);
        state.current = Some(CurrentSegment {
            data_path: new_data_path,
            ids_path: new_ids_path,
        });
        Ok(())
    }

    fn refresh_legacy_loader(&self, state: &mut State, stat: &BufFileStat) -> JournalResult<()> {
        debug!("refresh legacy loader");
        match &state.legacy {
            None => {
                state.legacy = Some(Arc::new(LegacyLoader::new(
                    self.shutdown.clone(),
                    stat.old_data_files.clone(),
                    stat.old_ids_files.clone(),
                    self.config.committed_id_ttl,
                )?));
            }
            Some(legacy) => {
                legacy.reset(stat.old_data_files.clone(), stat.old_ids_files.clone());
                if self.config.aggressive_gc {
                    debug!("aggressive gc requested; no collector to hint");
                }
            }
        }
        Ok(())
    }

    /// Whether a rotation is due: no current segment yet, the data segment
    /// outgrew `buf_size_bytes`, or the segment outlived `rotate_duration`.
    pub fn is_ready_to_rotate(&self) -> bool {
        let state = self.state.read();
        let Some(current) = state.current.as_ref() else {
            return true;
        };
        let size = match fs::metadata(&current.data_path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                error!(file = %current.data_path.display(), error = %err, "cannot stat current segment");
                return false;
            }
        };
        size > self.config.buf_size_bytes
            || state.last_rotate_at.elapsed() > self.config.rotate_duration
    }

    /// Returns a handle to the journal's cancellation signal.
    ///
    /// Cancelling it stops the background tasks and the id-set sweepers,
    /// the same signal [`close`](Self::close) fires; hosts can tie it to
    /// their own shutdown sequencing.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Tries to take the legacy lock for a replay drain. `true` on success.
    pub fn lock_legacy(&self) -> bool {
        debug!("try to lock legacy");
        self.legacy_lock.try_lock()
    }

    /// Whether a consumer (or rotation) currently holds the legacy lock.
    pub fn is_legacy_running(&self) -> bool {
        self.legacy_lock.is_locked()
    }

    /// Releases the legacy lock. Returns `true` iff it was held.
    pub fn unlock_legacy(&self) -> bool {
        debug!("try to unlock legacy");
        self.legacy_lock.unlock()
    }

    /// Yields the next uncommitted legacy record.
    ///
    /// Returns `Ok(None)` when replay is exhausted; at that point the
    /// replayed segments have been cleaned and the legacy lock released, so
    /// a subsequent [`lock_legacy`](Self::lock_legacy) succeeds again.
    ///
    /// # Panics
    ///
    /// Panics when called without having taken the legacy lock via
    /// [`lock_legacy`](Self::lock_legacy); that is a programming error.
    ///
    /// # Errors
    ///
    /// Propagates loader failures, releasing the legacy lock first.
    pub fn load_legacy_buf(&self) -> JournalResult<Option<DataRecord>> {
        assert!(
            self.is_legacy_running(),
            "load_legacy_buf requires lock_legacy() to be held"
        );
        // the read side only pins the loader handle against rotation
        let state = self.state.read();

        let Some(legacy) = state.legacy.as_ref() else {
            self.unlock_legacy();
            return Ok(None);
        };

        match legacy.load() {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                debug!("legacy replay finished");
                legacy.clean();
                self.unlock_legacy();
                Ok(None)
            }
            Err(err) => {
                self.unlock_legacy();
                Err(err)
            }
        }
    }

    /// Returns the largest committed id found in the legacy id segments, or
    /// 0 when there are none.
    pub fn load_max_id(&self) -> JournalResult<i64> {
        let state = self.state.read();
        match state.legacy.as_ref() {
            Some(legacy) => legacy.load_max_id(),
            None => Ok(0),
        }
    }

    /// Monitoring snapshot.
    pub fn metrics(&self) -> HashMap<&'static str, usize> {
        let state = self.state.read();
        let ids_len = state.legacy.as_ref().map_or(0, |l| l.ids_len());
        HashMap::from([("idsSetLen", ids_len)])
    }

    fn run_flush_trigger(&self) {
        loop {
            if self.shutdown.wait_timeout(self.config.flush_interval) {
                break;
            }
            if let Err(err) = self.flush() {
                error!(error = %err, "periodic flush failed");
            }
        }
        if let Err(err) = self.flush() {
            error!(error = %err, "final flush failed");
        }
        debug!(name = %self.config.name, "flush trigger exit");
    }

    fn run_rotate_trigger(&self) {
        loop {
            if self.shutdown.wait_timeout(self.config.rotate_check_interval) {
                break;
            }
            if self.is_ready_to_rotate() {
                if let Err(err) = self.rotate() {
                    error!(error = %err, "periodic rotation failed");
                }
            }
        }
        debug!(name = %self.config.name, "rotate trigger exit");
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("name", &self.config.name)
            .field("dir", &self.config.buf_dir_path)
            .field("legacy_running", &self.is_legacy_running())
            .finish_non_exhaustive()
    }
}

fn flush_encoders(state: &State) -> JournalResult<()> {
    let mut failures = Vec::new();
    if let Some(enc) = state.ids_enc.lock().as_mut() {
        if let Err(err) = enc.flush() {
            failures.push(format!("flush ids: {err}"));
        }
    }
    if let Some(enc) = state.data_enc.lock().as_mut() {
        if let Err(err) = enc.flush() {
            failures.push(format!("flush data: {err}"));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(JournalError::flush(failures.join("; ")))
    }
}

fn close_encoders(state: &State) -> JournalResult<()> {
    let mut failures = Vec::new();
    if let Some(enc) = state.ids_enc.lock().as_mut() {
        if let Err(err) = enc.close() {
            failures.push(format!("close ids: {err}"));
        }
    }
    if let Some(enc) = state.data_enc.lock().as_mut() {
        if let Err(err) = enc.close() {
            failures.push(format!("close data: {err}"));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(JournalError::flush(failures.join("; ")))
    }
}
