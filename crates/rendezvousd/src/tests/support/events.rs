//! Event source driven by the test instead of by signals.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::broker::{BrokerEvent, EventSource, Waker};

#[derive(Debug, Default)]
struct ManualState {
    sender: Option<Sender<BrokerEvent>>,
    waker: Option<Waker>,
    started: bool,
    stopped: usize,
}

/// Cloneable handle: one clone goes into the broker, the test keeps another
/// to emit events.
#[derive(Debug, Clone, Default)]
pub struct ManualEvents {
    state: Arc<Mutex<ManualState>>,
}

impl ManualEvents {
    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().expect("manual events mutex poisoned")
    }

    /// Forwards `event` and wakes the broker, as the signal listener would.
    pub fn emit(&self, event: BrokerEvent) {
        let state = self.lock();
        let sender = state.sender.as_ref().expect("event source started");
        sender.send(event).expect("broker is receiving events");
        if let Some(waker) = &state.waker {
            waker.wake();
        }
    }

    /// Whether the broker started the source.
    pub fn started(&self) -> bool {
        self.lock().started
    }

    /// Whether the broker stopped the source.
    pub fn stopped(&self) -> bool {
        self.lock().stopped > 0
    }
}

impl EventSource for ManualEvents {
    fn start(&mut self, events: Sender<BrokerEvent>, waker: Waker) -> io::Result<()> {
        let mut state = self.lock();
        state.sender = Some(events);
        state.waker = Some(waker);
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.sender = None;
        state.waker = None;
        state.stopped += 1;
    }
}
