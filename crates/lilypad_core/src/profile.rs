//! # Duration Profiler
//!
//! Records nested begin/end events per thread and writes them as a Chrome
//! trace (`chrome://tracing`, Perfetto).
//!
//! ```rust,no_run
//! use lilypad_core::profile::TraceRecorder;
//!
//! let trace = TraceRecorder::new(1024);
//! trace.capture_start("frame.json");
//! {
//!     let _frame = trace.span("frame");
//!     let _physics = trace.span("physics");
//! }
//! trace.capture_stop().unwrap();
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::TraceError;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
}

fn current_tid() -> u64 {
    TID.with(|tid| *tid)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
enum Phase {
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
}

#[derive(Clone, Debug, Serialize)]
struct TraceEvent {
    name: String,
    ph: Phase,
    pid: u32,
    tid: u64,
    ts: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceDocument<'a> {
    display_time_unit: &'static str,
    trace_events: &'a [TraceEvent],
}

#[derive(Default)]
struct CaptureState {
    path: Option<PathBuf>,
    events: Vec<TraceEvent>,
    open: HashMap<u64, Vec<String>>,
    dropped: usize,
}

/// Thread-safe recorder of nested durations.
pub struct TraceRecorder {
    start: Instant,
    pid: u32,
    capacity: usize,
    state: Mutex<CaptureState>,
}

impl TraceRecorder {
    /// Creates a recorder holding at most `event_capacity` events per
    /// capture. Further events are dropped and counted.
    #[must_use]
    pub fn new(event_capacity: usize) -> Self {
        Self {
            start: Instant::now(),
            pid: std::process::id(),
            capacity: event_capacity,
            state: Mutex::new(CaptureState::default()),
        }
    }

    /// Returns `true` while a capture is active.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.state.lock().path.is_some()
    }

    /// Events recorded in the current capture.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Opens a duration on the calling thread.
    pub fn duration_push(&self, name: &str) {
        let mut state = self.state.lock();
        if state.path.is_none() {
            return;
        }
        let tid = current_tid();
        state.open.entry(tid).or_default().push(name.to_owned());
        self.record(&mut state, name.to_owned(), Phase::Begin, tid);
    }

    /// Closes the innermost open duration of the calling thread.
    ///
    /// Ignored when the thread has nothing open in this capture.
    pub fn duration_pop(&self) {
        let mut state = self.state.lock();
        if state.path.is_none() {
            return;
        }
        let tid = current_tid();
        let Some(name) = state.open.get_mut(&tid).and_then(Vec::pop) else {
            tracing::warn!(tid, "duration_pop without matching push");
            return;
        };
        self.record(&mut state, name, Phase::End, tid);
    }

    /// Opens a duration that closes when the guard drops.
    pub fn span(&self, name: &str) -> DurationGuard<'_> {
        self.duration_push(name);
        DurationGuard { recorder: self }
    }

    /// Starts recording events destined for `path`, discarding any capture
    /// in progress.
    pub fn capture_start(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock();
        *state = CaptureState {
            path: Some(path.as_ref().to_path_buf()),
            events: Vec::with_capacity(self.capacity.min(4096)),
            ..CaptureState::default()
        };
        tracing::debug!(path = %path.as_ref().display(), "trace capture started");
    }

    /// Stops recording and writes the capture. Returns the number of events
    /// written.
    ///
    /// # Errors
    ///
    /// - [`TraceError::NotCapturing`] if no capture is active
    /// - [`TraceError::Io`] / [`TraceError::Json`] if writing fails
    pub fn capture_stop(&self) -> Result<usize, TraceError> {
        let (path, events, dropped) = {
            let mut state = self.state.lock();
            let path = state.path.take().ok_or(TraceError::NotCapturing)?;
            let events = std::mem::take(&mut state.events);
            state.open.clear();
            (path, events, std::mem::take(&mut state.dropped))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(
            &mut writer,
            &TraceDocument {
                display_time_unit: "ns",
                trace_events: &events,
            },
        )?;
        writer.flush()?;

        if dropped > 0 {
            tracing::warn!(dropped, capacity = self.capacity, "trace events dropped");
        }
        tracing::debug!(path = %path.display(), events = events.len(), "trace capture written");
        Ok(events.len())
    }

    fn record(&self, state: &mut CaptureState, name: String, ph: Phase, tid: u64) {
        if state.events.len() >= self.capacity {
            state.dropped += 1;
            return;
        }
        #[allow(clippy::cast_possible_truncation)]
        let ts = self.start.elapsed().as_micros() as u64;
        state.events.push(TraceEvent {
            name,
            ph,
            pid: self.pid,
            tid,
            ts,
        });
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("capacity", &self.capacity)
            .field("capturing", &self.is_capturing())
            .finish_non_exhaustive()
    }
}

/// Closes its duration on drop.
#[derive(Debug)]
#[must_use = "the duration closes as soon as the guard is dropped"]
pub struct DurationGuard<'a> {
    recorder: &'a TraceRecorder,
}

impl Drop for DurationGuard<'_> {
    fn drop(&mut self) {
        self.recorder.duration_pop();
    }
}
