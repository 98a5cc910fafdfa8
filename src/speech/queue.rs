//! [`SpeechQueue`]: the single owner of the speech engine.
//!
//! Two ways in:
//!
//! * [`SpeechQueue::speak`] interrupts.  Whatever is playing is cut off, the
//!   backlog is dropped and the new text plays next.  Coach replies use this
//!   so a fresh turn always replaces a stale one.
//! * [`SpeechQueue::enqueue`] waits its turn in a FIFO that drains one
//!   utterance at a time.
//!
//! A completion callback fires exactly once for an utterance that runs to its
//! end and never for one that was cancelled or superseded.  An engine error
//! ends the utterance like a natural finish so a waiting turn is never
//! stranded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use super::engine::SpeechEngine;

/// Runs once when an utterance finishes naturally.
pub type SpeechCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
pub struct SpeechQueue {
    shared: Arc<Shared>,
}

struct Shared {
    engine: Arc<dyn SpeechEngine>,
    supported: bool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    current: Option<InFlight>,
    queue: VecDeque<Pending>,
}

struct InFlight {
    generation: u64,
    task: JoinHandle<()>,
    on_complete: Option<SpeechCallback>,
}

struct Pending {
    text: String,
    on_complete: Option<SpeechCallback>,
}

impl SpeechQueue {
    /// Wrap `engine`.  Its capability flag is read here, once.
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        let supported = engine.is_supported();
        if !supported {
            log::info!("speech: engine unsupported, speech requests are ignored");
        }
        Self {
            shared: Arc::new(Shared {
                engine,
                supported,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// `false` means `speak` and `enqueue` do nothing and no callback will
    /// ever fire; callers must not wait on one.
    pub fn is_supported(&self) -> bool {
        self.shared.supported
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Utterances waiting behind the current one.
    pub fn pending_len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Installed voice names; empty when speech is unavailable.
    pub async fn load_voices(&self) -> Vec<String> {
        if !self.shared.supported {
            return Vec::new();
        }
        self.shared.engine.load_voices().await
    }

    /// Interrupt anything playing or queued and speak `text` now.
    pub fn speak(&self, text: impl Into<String>, on_complete: Option<SpeechCallback>) {
        if !self.shared.supported {
            return;
        }
        let mut inner = self.lock();
        let dropped = inner.queue.len();
        if Self::stop_current(&mut inner) || dropped > 0 {
            log::debug!("speech: interrupted current utterance, dropped {dropped} queued");
        }
        inner.queue.clear();
        self.begin(
            &mut inner,
            Pending {
                text: text.into(),
                on_complete,
            },
        );
    }

    /// Append `text` behind whatever is playing.
    pub fn enqueue(&self, text: impl Into<String>, on_complete: Option<SpeechCallback>) {
        if !self.shared.supported {
            return;
        }
        let pending = Pending {
            text: text.into(),
            on_complete,
        };
        let mut inner = self.lock();
        if inner.current.is_none() {
            self.begin(&mut inner, pending);
        } else {
            inner.queue.push_back(pending);
        }
    }

    /// Silence the current utterance and drop the backlog.  No callback
    /// fires.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        let stopped = Self::stop_current(&mut inner);
        inner.queue.clear();
        if stopped {
            log::debug!("speech: cancelled");
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort the in-flight utterance.  Returns whether there was one.
    fn stop_current(inner: &mut Inner) -> bool {
        inner.generation += 1;
        match inner.current.take() {
            // aborting drops the engine future, which silences it
            Some(in_flight) => {
                in_flight.task.abort();
                true
            }
            None => false,
        }
    }

    fn begin(&self, inner: &mut Inner, pending: Pending) {
        inner.generation += 1;
        let generation = inner.generation;
        let engine = Arc::clone(&self.shared.engine);
        let queue = self.clone();
        let text = pending.text;

        let task = tokio::spawn(async move {
            if let Err(err) = engine.speak(&text).await {
                log::warn!("speech: {err}");
            }
            queue.finished(generation);
        });

        inner.current = Some(InFlight {
            generation,
            task,
            on_complete: pending.on_complete,
        });
    }

    fn finished(&self, generation: u64) {
        let on_complete = {
            let mut inner = self.lock();
            let is_current = inner
                .current
                .as_ref()
                .is_some_and(|c| c.generation == generation);
            if !is_current {
                return;
            }
            let on_complete = inner.current.take().and_then(|c| c.on_complete);
            if let Some(next) = inner.queue.pop_front() {
                self.begin(&mut inner, next);
            }
            on_complete
        };

        if let Some(callback) = on_complete {
            callback();
        }
    }
}
