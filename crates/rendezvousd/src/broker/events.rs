//! Signals turned into broker events.
//!
//! Signal handlers run on a listener thread that only forwards a
//! [`BrokerEvent`] over a channel and wakes the loop with a message on the
//! rendezvous port. All state changes happen on the loop thread.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use rendezvous_wire::PortName;
use signal_hook::consts::signal::{SIGCHLD, SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, info, warn};

use super::BROKER_TARGET;
use crate::ports::{self, PortSpace};

/// Something the loop must react to outside the request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEvent {
    /// At least one child changed state.
    ChildExited,
    /// A termination signal arrived.
    Terminate {
        /// Signal number.
        signal: i32,
    },
}

/// Unblocks the loop's receive by sending the wake message.
#[derive(Debug, Clone)]
pub struct Waker {
    space: Arc<dyn PortSpace>,
    port: PortName,
}

impl Waker {
    /// Wakes the loop listening on `port`, which must name a send right in
    /// `space`.
    #[must_use]
    pub fn new(space: Arc<dyn PortSpace>, port: PortName) -> Self {
        Self { space, port }
    }

    /// Sends the wake message. Failures are logged; the loop still notices
    /// the event on its next timeout.
    pub fn wake(&self) {
        if let Err(error) = ports::wake(self.space.as_ref(), self.port) {
            warn!(target: BROKER_TARGET, port = %self.port, %error, "failed to wake broker");
        }
    }
}

/// Producer of [`BrokerEvent`]s.
pub trait EventSource: Send {
    /// Starts forwarding events to `events`, waking the loop after each.
    fn start(&mut self, events: Sender<BrokerEvent>, waker: Waker) -> io::Result<()>;

    /// Stops forwarding. Calling it again has no effect.
    fn stop(&mut self);
}

/// Forwards SIGCHLD and the termination signals.
#[derive(Debug, Default)]
pub struct SignalEvents {
    listener: Option<(Handle, JoinHandle<()>)>,
}

impl SignalEvents {
    /// Builds a source that installs its handlers on [`EventSource::start`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSource for SignalEvents {
    fn start(&mut self, events: Sender<BrokerEvent>, waker: Waker) -> io::Result<()> {
        let mut signals = Signals::new([SIGCHLD, SIGTERM, SIGINT, SIGQUIT, SIGHUP])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("rendezvous-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    let event = if signal == SIGCHLD {
                        BrokerEvent::ChildExited
                    } else {
                        info!(target: BROKER_TARGET, signal, "termination signal received");
                        BrokerEvent::Terminate { signal }
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                    waker.wake();
                }
                debug!(target: BROKER_TARGET, "signal listener stopped");
            })?;
        self.listener = Some((handle, thread));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some((handle, thread)) = self.listener.take() {
            handle.close();
            if thread.join().is_err() {
                warn!(target: BROKER_TARGET, "signal listener panicked");
            }
        }
    }
}

impl Drop for SignalEvents {
    fn drop(&mut self) {
        self.stop();
    }
}
