//! Serializes every inbound event source onto one consumer.
//!
//! The connection manager is fed by three queues: the adapter's event
//! stream, the manager's own loopback queue (retries), and the command
//! queue shared by every [`crate::ManagerHandle`]. The router hands them out
//! one at a time, so the manager's state is only ever touched by a single
//! task.
//!
//! Already-queued adapter events are always handed out before loopback
//! messages, and loopback messages before commands. A command therefore sees
//! the effect of every adapter event that was delivered before it was sent.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relink_types::AdapterPower;

use crate::adapter::{AdapterEvent, AdapterEventStream};

/// One unit of work for the manager.
#[derive(Debug)]
pub enum Inbound<H, C> {
    /// Event from the radio stack.
    Adapter(AdapterEvent<H>),
    /// Message from a handle or from the manager's loopback queue.
    Command(C),
}

/// Merges the adapter event stream with the loopback and command queues.
pub struct EventRouter<H, C> {
    events: Option<AdapterEventStream<H>>,
    loopback: mpsc::UnboundedReceiver<C>,
    commands: mpsc::UnboundedReceiver<C>,
}

impl<H, C> EventRouter<H, C> {
    /// Create a router over the given sources.
    pub fn new(
        events: AdapterEventStream<H>,
        loopback: mpsc::UnboundedReceiver<C>,
        commands: mpsc::UnboundedReceiver<C>,
    ) -> Self {
        Self {
            events: Some(events),
            loopback,
            commands,
        }
    }

    /// Whether the adapter stream is still open.
    pub fn adapter_attached(&self) -> bool {
        self.events.is_some()
    }

    /// Next unit of work.
    ///
    /// Returns `None` once every command sender has been dropped. When the
    /// adapter stream ends, a single `PowerChanged(Unsupported)` is returned
    /// in its place and the adapter source is detached.
    pub async fn next(&mut self) -> Option<Inbound<H, C>> {
        tokio::select! {
            biased;

            event = next_event(&mut self.events) => match event {
                Some(event) => Some(Inbound::Adapter(event)),
                None => {
                    warn!("Adapter event stream ended; treating adapter as unsupported");
                    self.events = None;
                    Some(Inbound::Adapter(AdapterEvent::PowerChanged(AdapterPower::Unsupported)))
                }
            },
            Some(message) = self.loopback.recv() => Some(Inbound::Command(message)),
            command = self.commands.recv() => match command {
                Some(command) => Some(Inbound::Command(command)),
                None => {
                    debug!("All manager handles dropped");
                    None
                }
            },
        }
    }
}

async fn next_event<H>(events: &mut Option<AdapterEventStream<H>>) -> Option<AdapterEvent<H>> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl<H, C> std::fmt::Debug for EventRouter<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("adapter_attached", &self.events.is_some())
            .finish_non_exhaustive()
    }
}
