//! Ingest pump: the producer context of the observation collector.
//!
//! Forwards scan, robot-state, command and subgoal traffic from the
//! [`EventBus`] into a [`SensorHub`].  Runs as its own Tokio task so message
//! delivery and the fusion update happen concurrently with the consumer's
//! observation requests.

use arena_perception::SensorHub;
use arena_types::SensorMessage;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Topic};

/// Subscribe to `bus` and spawn the pump task.
///
/// The subscription is taken before this function returns, so nothing
/// published afterwards is missed.  The task ends when every bus handle has
/// been dropped.
pub fn spawn_ingest(bus: &EventBus, hub: SensorHub) -> JoinHandle<()> {
    let mut rx = bus.subscribe_all();
    tokio::spawn(async move {
        let mut forwarded: u64 = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if matches!(event.payload, SensorMessage::NextCycle(_)) {
                        continue;
                    }
                    let topic = Topic::of(&event.payload);
                    forwarded += 1;
                    if let Err(e) = hub.ingest(event.payload) {
                        debug!(topic = topic.name(), source = %event.source, error = %e, "ingest rejected message");
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "ingest pump lagged; oldest sensor messages dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!(forwarded, "ingest pump stopped");
    })
}
