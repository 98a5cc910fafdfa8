//! Dedicated OS-thread listener around `rdev::listen`.
//!
//! `rdev::listen` cannot be interrupted.  Dropping [`HotkeyListener`] sets a
//! stop flag so the callback forwards nothing more; the thread itself stays
//! parked in the OS event loop until the process exits.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{HotkeyBindings, HotkeyEvent};

pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    /// Never joined; `rdev::listen` does not return.
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Forward a [`HotkeyEvent`] on `tx` for every press of a bound key.
    /// Releases and auto-repeat presses of a held key are ignored.
    pub fn start(bindings: HotkeyBindings, tx: mpsc::Sender<HotkeyEvent>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("voice-coach-hotkeys".into())
            .spawn(move || {
                let mut held: Option<rdev::Key> = None;
                let result = rdev::listen(move |event| {
                    if stop_flag.load(Ordering::Relaxed) {
                        return;
                    }
                    match event.event_type {
                        rdev::EventType::KeyPress(key) => {
                            if held == Some(key) {
                                return;
                            }
                            if let Some(action) = bindings.event_for(key) {
                                held = Some(key);
                                // blocking_send: this is not a tokio thread
                                let _ = tx.blocking_send(action);
                            }
                        }
                        rdev::EventType::KeyRelease(key) if held == Some(key) => held = None,
                        _ => {}
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkeys: rdev::listen exited: {e:?}");
                }
            })?;

        Ok(Self {
            stop,
            _thread: thread,
        })
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
