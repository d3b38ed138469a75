//! `arena-middleware` – the transport boundary of the observation collector.
//!
//! Moves messages between the simulator (or robot) and the collector
//! without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned publish/subscribe bus built on Tokio
//!   broadcast channels, one lane per inbound stream.
//! - [`ingest`] – the pump task that feeds bus traffic into a
//!   [`SensorHub`][arena_perception::SensorHub].
//! - [`service`] – [`StepService`] and [`PacingSignal`], the outbound
//!   simulation-control and deployment-pacing seams.

pub mod bus;
pub mod ingest;
pub mod service;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ingest::spawn_ingest;
pub use service::{BusPacing, PacingSignal, StepService};
