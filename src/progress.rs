//! Rate-limited progress reporting (component K).
//!
//! A worker posts snapshots cheaply and a background-ish flush loop
//! decides when something is actually worth emitting, instead of logging
//! on every item.

use std::fmt::Display;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct State<T> {
    last: Option<T>,
    last_rendered: Option<String>,
    last_flush: Instant,
}

/// A rate-limited reporter: `set` is cheap and safe to call from a hot
/// loop; a flush only happens (via `maybe_flush` or `done`) at most every
/// `interval`, and only when the snapshot or its rendering actually
/// changed.
pub struct Progress<T: Eq + Display + Clone> {
    interval: Duration,
    hang_after: Option<Duration>,
    state: Mutex<State<T>>,
    emit: Box<dyn Fn(&str) + Send + Sync>,
}

impl<T: Eq + Display + Clone> Progress<T> {
    pub fn new(interval: Duration, emit: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            interval,
            hang_after: None,
            state: Mutex::new(State {
                last: None,
                last_rendered: None,
                last_flush: Instant::now(),
            }),
            emit: Box::new(emit),
        }
    }

    /// Sets a hang-detection window: if `set` keeps being called but no
    /// flush has happened for longer than this, `set` panics. This is a
    /// diagnostic contract for stuck workers, not error handling.
    pub fn with_hang_detection(mut self, window: Duration) -> Self {
        self.hang_after = Some(window);
        self
    }

    /// Posts a new snapshot. May flush if `interval` has elapsed and the
    /// snapshot changed; cheap otherwise.
    pub fn set(&self, value: T) {
        let mut state = self.state.lock();

        if let Some(hang_after) = self.hang_after {
            if state.last_flush.elapsed() > hang_after {
                panic!(
                    "progress reporter has not flushed in over {:?}; worker appears hung",
                    hang_after
                );
            }
        }

        let changed = state.last.as_ref() != Some(&value);
        state.last = Some(value);

        if changed && state.last_flush.elapsed() >= self.interval {
            self.flush_locked(&mut state);
        }
    }

    fn flush_locked(&self, state: &mut State<T>) {
        if let Some(v) = &state.last {
            let rendered = v.to_string();
            if state.last_rendered.as_deref() != Some(rendered.as_str()) {
                (self.emit)(&rendered);
                state.last_rendered = Some(rendered);
            }
        }
        state.last_flush = Instant::now();
    }

    /// Flushes once more regardless of `interval`, blocking until done.
    pub fn done(&self) {
        let mut state = self.state.lock();
        self.flush_locked(&mut state);
    }
}
