//! Topic-based publish/subscribe bus standing in for the robot middleware.
//!
//! Uses [`tokio::sync::broadcast`] channels so every subscriber receives
//! every message without any single subscriber blocking the others.
//!
//! # Topics
//!
//! | Topic | ROS counterpart | Stamped |
//! |---|---|---|
//! | [`Topic::Scan`] | `scan` | yes |
//! | [`Topic::RobotState`] | `plan_manager/robot_state` | yes |
//! | [`Topic::CmdVel`] | `cmd_vel` | no (headerless) |
//! | [`Topic::Subgoal`] | `move_base_simple/goal` | yes, not synchronized |
//! | [`Topic::NextCycle`] | `next_cycle` | no |
//!
//! Every event is additionally mirrored onto an all-topics lane, which keeps
//! cross-topic delivery order for consumers such as the ingest pump.

use arena_types::{ArenaError, Event, SensorMessage};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Scan,
    RobotState,
    CmdVel,
    Subgoal,
    NextCycle,
}

impl Topic {
    /// The lane a payload belongs on.
    pub fn of(msg: &SensorMessage) -> Self {
        match msg {
            SensorMessage::Scan(_) => Topic::Scan,
            SensorMessage::RobotState(_) => Topic::RobotState,
            SensorMessage::CmdVel(_) => Topic::CmdVel,
            SensorMessage::Subgoal(_) => Topic::Subgoal,
            SensorMessage::NextCycle(_) => Topic::NextCycle,
        }
    }

    /// ROS topic name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Scan => "scan",
            Topic::RobotState => "plan_manager/robot_state",
            Topic::CmdVel => "cmd_vel",
            Topic::Subgoal => "move_base_simple/goal",
            Topic::NextCycle => "next_cycle",
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    scan: broadcast::Sender<Event>,
    robot_state: broadcast::Sender<Event>,
    cmd_vel: broadcast::Sender<Event>,
    subgoal: broadcast::Sender<Event>,
    next_cycle: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every lane independently.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (scan, _) = broadcast::channel(capacity);
        let (robot_state, _) = broadcast::channel(capacity);
        let (cmd_vel, _) = broadcast::channel(capacity);
        let (subgoal, _) = broadcast::channel(capacity);
        let (next_cycle, _) = broadcast::channel(capacity);
        Self {
            all,
            scan,
            robot_state,
            cmd_vel,
            subgoal,
            next_cycle,
        }
    }

    /// Publish `event` on the lane matching its payload and on the
    /// all-topics lane.
    ///
    /// Returns the number of receivers on the topic lane.  Having no
    /// subscribers is normal for sensor traffic and yields `Ok(0)`.
    pub fn publish(&self, event: Event) -> Result<usize, ArenaError> {
        let topic = Topic::of(&event.payload);
        trace!(topic = topic.name(), source = %event.source, "publish");
        // No receivers on either lane is not an error.
        let _ = self.all.send(event.clone());
        Ok(self.topic_sender(topic).send(event).unwrap_or(0))
    }

    /// Wrap `msg` in an [`Event`] from `source` and publish it.
    pub fn publish_msg(&self, source: &str, msg: SensorMessage) -> Result<usize, ArenaError> {
        self.publish(Event::new(source, msg))
    }

    /// Subscribe to a single [`Topic`].
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Subscribe to every topic, in publication order.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.all.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Scan => &self.scan,
            Topic::RobotState => &self.robot_state,
            Topic::CmdVel => &self.cmd_vel,
            Topic::Subgoal => &self.subgoal,
            Topic::NextCycle => &self.next_cycle,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to one topic lane (or to the all-topics lane).
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// * `Err(RecvError::Lagged(n))` – the receiver fell behind and `n`
    ///   events were dropped; the caller decides whether to continue.
    /// * `Err(RecvError::Closed)` – every sender has been dropped.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The lane this receiver is bound to; `None` for the all-topics lane.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_types::{Header, LaserScan, Twist};

    fn scan_event() -> Event {
        Event::new(
            "test::lidar",
            SensorMessage::Scan(LaserScan {
                header: Header::at(1.0),
                range_max: 10.0,
                ranges: vec![1.0],
                ..LaserScan::default()
            }),
        )
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(scan_event()).unwrap(), 0);
    }

    #[tokio::test]
    async fn topic_subscriber_receives_matching_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Scan);
        let event = scan_event();
        assert_eq!(bus.publish(event.clone())?, 1);

        let received = rx.recv().await?;
        assert_eq!(received.id, event.id);
        assert_eq!(rx.topic(), Some(Topic::Scan));
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut cmd_rx = bus.subscribe_to(Topic::CmdVel);
        bus.publish(scan_event())?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), cmd_rx.recv()).await;
        assert!(result.is_err(), "cmd_vel subscriber must not receive a scan");
        Ok(())
    }

    #[tokio::test]
    async fn all_lane_preserves_cross_topic_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut all = bus.subscribe_all();
        bus.publish_msg("test", SensorMessage::CmdVel(Twist::planar(0.1, 0.0)))?;
        bus.publish(scan_event())?;
        bus.publish_msg("test", SensorMessage::NextCycle(true))?;

        assert!(matches!(all.recv().await?.payload, SensorMessage::CmdVel(_)));
        assert!(matches!(all.recv().await?.payload, SensorMessage::Scan(_)));
        assert!(matches!(all.recv().await?.payload, SensorMessage::NextCycle(true)));
        assert_eq!(all.topic(), None);
        Ok(())
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Scan);
        for _ in 0..100 {
            let _ = bus.publish(scan_event());
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn topic_of_payload() {
        assert_eq!(Topic::of(&SensorMessage::NextCycle(false)), Topic::NextCycle);
        assert_eq!(Topic::Subgoal.name(), "move_base_simple/goal");
    }
}
