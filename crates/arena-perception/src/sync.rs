//! Approximate-time synchronizer.
//!
//! Matches independently-arriving, independently-stamped message streams into
//! aligned tuples.  A tuple is emitted only when one message from every
//! stamped stream can be chosen such that the spread of their header stamps
//! (`max − min`) is within `slop`.
//!
//! Headerless streams carry no stamp.  They are never time-matched: the
//! latest value is paired with whatever the stamped streams produce, and a
//! tuple can only be emitted once every headerless stream has delivered at
//! least one message.
//!
//! # Matching policy
//!
//! Each stamped stream keeps a bounded window (`queue_size`) of pending
//! messages.  Every pending message is tried as a pivot, newest first; for
//! each other stamped stream the message closest in time to the pivot is
//! picked.  The first pivot whose picks fit within `slop` wins.  The matched
//! messages and everything older on their streams are then discarded, since
//! none of them can take part in a newer match.
//!
//! # Example
//!
//! ```rust
//! use arena_perception::sync::{ApproximateTimeSynchronizer, StreamSpec};
//!
//! let mut sync = ApproximateTimeSynchronizer::new(
//!     vec![StreamSpec::stamped("scan"), StreamSpec::stamped("pose"), StreamSpec::headerless("cmd")],
//!     100,
//!     0.05,
//! );
//!
//! assert!(sync.add(0, Some(10.00), "scan").unwrap().is_none());
//! assert!(sync.add(2, None, "cmd").unwrap().is_none());
//! let tuple = sync.add(1, Some(10.03), "pose").unwrap().expect("within slop");
//! assert_eq!(tuple, vec!["scan", "pose", "cmd"]);
//! ```

use std::collections::VecDeque;

use arena_types::ArenaError;
use tracing::trace;

/// Absorbs floating-point noise when a spread lands exactly on `slop`.
const SLOP_EPSILON: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Stream description
// ────────────────────────────────────────────────────────────────────────────

/// Declares one input stream of the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub headerless: bool,
}

impl StreamSpec {
    pub fn stamped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headerless: false,
        }
    }

    pub fn headerless(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headerless: true,
        }
    }
}

enum Slot<M> {
    Stamped(VecDeque<(f64, M)>),
    Headerless(Option<M>),
}

// ────────────────────────────────────────────────────────────────────────────
// ApproximateTimeSynchronizer
// ────────────────────────────────────────────────────────────────────────────

/// Emits one tuple per successful approximate-time match.
///
/// Tuples are returned from [`add`][Self::add] in stream declaration order.
pub struct ApproximateTimeSynchronizer<M> {
    specs: Vec<StreamSpec>,
    slots: Vec<Slot<M>>,
    queue_size: usize,
    slop: f64,
    dropped: u64,
}

impl<M: Clone> ApproximateTimeSynchronizer<M> {
    /// Create a synchronizer over `specs`.
    ///
    /// `queue_size` bounds each stamped stream's window (clamped to at least
    /// 1); `slop` is the largest accepted stamp spread in seconds.
    pub fn new(specs: Vec<StreamSpec>, queue_size: usize, slop: f64) -> Self {
        let slots = specs
            .iter()
            .map(|s| {
                if s.headerless {
                    Slot::Headerless(None)
                } else {
                    Slot::Stamped(VecDeque::new())
                }
            })
            .collect();
        Self {
            specs,
            slots,
            queue_size: queue_size.max(1),
            slop: slop.max(0.0),
            dropped: 0,
        }
    }

    /// Feed one message into `stream`.
    ///
    /// Returns `Ok(Some(tuple))` when this message completed a match.
    ///
    /// # Errors
    ///
    /// [`ArenaError::Channel`] if `stream` is unknown, or if a stamped stream
    /// is given no stamp or a non-finite one.
    pub fn add(
        &mut self,
        stream: usize,
        stamp: Option<f64>,
        msg: M,
    ) -> Result<Option<Vec<M>>, ArenaError> {
        let queue_size = self.queue_size;
        let spec_name = self
            .specs
            .get(stream)
            .map(|s| s.name.clone())
            .ok_or_else(|| ArenaError::Channel(format!("unknown synchronizer stream {stream}")))?;

        match &mut self.slots[stream] {
            Slot::Headerless(latest) => {
                *latest = Some(msg);
            }
            Slot::Stamped(window) => {
                let stamp = match stamp {
                    Some(t) if t.is_finite() => t,
                    other => {
                        return Err(ArenaError::Channel(format!(
                            "stream '{spec_name}' requires a finite header stamp, got {other:?}"
                        )));
                    }
                };
                window.push_back((stamp, msg));
                while window.len() > queue_size {
                    window.pop_front();
                    self.dropped += 1;
                }
            }
        }

        Ok(self.try_match())
    }

    /// Number of messages waiting in `stream`'s window (headerless streams
    /// report 0 or 1).
    pub fn pending(&self, stream: usize) -> usize {
        match self.slots.get(stream) {
            Some(Slot::Stamped(w)) => w.len(),
            Some(Slot::Headerless(latest)) => usize::from(latest.is_some()),
            None => 0,
        }
    }

    /// Messages evicted because a window overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn slop(&self) -> f64 {
        self.slop
    }

    /// Forget every pending message.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            match slot {
                Slot::Stamped(w) => w.clear(),
                Slot::Headerless(latest) => *latest = None,
            }
        }
    }

    fn try_match(&mut self) -> Option<Vec<M>> {
        let headerless_ready = self.slots.iter().all(|s| match s {
            Slot::Headerless(latest) => latest.is_some(),
            Slot::Stamped(_) => true,
        });
        if !headerless_ready {
            return None;
        }

        let mut pivots: Vec<f64> = self
            .slots
            .iter()
            .filter_map(|s| match s {
                Slot::Stamped(w) => Some(w.iter().map(|(t, _)| *t)),
                Slot::Headerless(_) => None,
            })
            .flatten()
            .collect();
        let has_stamped = self.slots.iter().any(|s| matches!(s, Slot::Stamped(_)));
        if has_stamped && pivots.is_empty() {
            return None;
        }
        pivots.sort_by(|a, b| b.total_cmp(a));

        // picks[i] = index into stream i's window (unused for headerless).
        let mut chosen: Option<Vec<usize>> = if has_stamped { None } else { Some(Vec::new()) };
        for pivot in pivots {
            if let Some(picks) = self.picks_around(pivot) {
                chosen = Some(picks);
                break;
            }
        }
        let picks = chosen?;

        let mut tuple = Vec::with_capacity(self.slots.len());
        let mut stamped_idx = 0;
        for slot in &mut self.slots {
            match slot {
                Slot::Headerless(latest) => tuple.push(latest.clone()?),
                Slot::Stamped(window) => {
                    let (stamp, msg) = window.remove(picks[stamped_idx])?;
                    window.retain(|(t, _)| *t > stamp);
                    tuple.push(msg);
                    stamped_idx += 1;
                }
            }
        }
        trace!(streams = tuple.len(), "approximate-time match emitted");
        Some(tuple)
    }

    /// For each stamped stream pick the message closest to `pivot`; `None`
    /// when the resulting spread exceeds `slop`.
    fn picks_around(&self, pivot: f64) -> Option<Vec<usize>> {
        let mut picks = Vec::new();
        let (mut lo, mut hi) = (pivot, pivot);
        for slot in &self.slots {
            let Slot::Stamped(window) = slot else {
                continue;
            };
            let (idx, stamp) = window
                .iter()
                .enumerate()
                .map(|(i, (t, _))| (i, *t))
                .min_by(|a, b| (a.1 - pivot).abs().total_cmp(&(b.1 - pivot).abs()))?;
            lo = lo.min(stamp);
            hi = hi.max(stamp);
            picks.push(idx);
        }
        (hi - lo <= self.slop + SLOP_EPSILON).then_some(picks)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: usize = 0;
    const POSE: usize = 1;
    const CMD: usize = 2;

    fn triple(slop: f64) -> ApproximateTimeSynchronizer<String> {
        ApproximateTimeSynchronizer::new(
            vec![
                StreamSpec::stamped("scan"),
                StreamSpec::stamped("pose"),
                StreamSpec::headerless("cmd_vel"),
            ],
            100,
            slop,
        )
    }

    fn add(
        sync: &mut ApproximateTimeSynchronizer<String>,
        stream: usize,
        stamp: Option<f64>,
        msg: &str,
    ) -> Option<Vec<String>> {
        sync.add(stream, stamp, msg.to_string()).unwrap()
    }

    #[test]
    fn fires_once_when_spread_within_slop() {
        let mut sync = triple(0.05);
        let mut fired = Vec::new();
        fired.extend(add(&mut sync, SCAN, Some(10.00), "scan@10.00"));
        fired.extend(add(&mut sync, POSE, Some(10.03), "pose@10.03"));
        fired.extend(add(&mut sync, CMD, None, "cmd"));

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0], vec!["scan@10.00", "pose@10.03", "cmd"]);
        // Matched entries were consumed.
        assert_eq!(sync.pending(SCAN), 0);
        assert_eq!(sync.pending(POSE), 0);
    }

    #[test]
    fn no_match_until_closer_pose_arrives() {
        let mut sync = triple(0.05);
        assert!(add(&mut sync, CMD, None, "cmd").is_none());
        assert!(add(&mut sync, SCAN, Some(10.00), "scan@10.00").is_none());
        assert!(add(&mut sync, POSE, Some(10.20), "pose@10.20").is_none());

        let tuple = add(&mut sync, POSE, Some(10.02), "pose@10.02").expect("close pose matches");
        assert_eq!(tuple, vec!["scan@10.00", "pose@10.02", "cmd"]);
        // The later pose is still a candidate for the next scan.
        assert_eq!(sync.pending(POSE), 1);
        let next = add(&mut sync, SCAN, Some(10.22), "scan@10.22").expect("pairs with 10.20");
        assert_eq!(next[1], "pose@10.20");
    }

    #[test]
    fn headerless_stream_must_be_seen_first() {
        let mut sync = triple(0.05);
        assert!(add(&mut sync, SCAN, Some(1.0), "scan").is_none());
        assert!(add(&mut sync, POSE, Some(1.0), "pose").is_none());
        let tuple = add(&mut sync, CMD, None, "cmd").expect("cmd completes the tuple");
        assert_eq!(tuple[2], "cmd");
    }

    #[test]
    fn headerless_latest_value_is_reused() {
        let mut sync = triple(0.05);
        add(&mut sync, CMD, None, "cmd-1");
        add(&mut sync, CMD, None, "cmd-2");
        add(&mut sync, SCAN, Some(2.0), "scan-a");
        let first = add(&mut sync, POSE, Some(2.01), "pose-a").unwrap();
        assert_eq!(first[2], "cmd-2");

        add(&mut sync, SCAN, Some(2.1), "scan-b");
        let second = add(&mut sync, POSE, Some(2.1), "pose-b").unwrap();
        assert_eq!(second[2], "cmd-2");
    }

    #[test]
    fn prefers_newest_match_and_discards_older_entries() {
        let mut sync = triple(0.05);
        add(&mut sync, CMD, None, "cmd");
        add(&mut sync, SCAN, Some(1.0), "scan@1.0");
        add(&mut sync, SCAN, Some(2.0), "scan@2.0");
        let tuple = add(&mut sync, POSE, Some(2.01), "pose@2.01").unwrap();
        assert_eq!(tuple[0], "scan@2.0");
        // scan@1.0 is older than the match and can never be used.
        assert_eq!(sync.pending(SCAN), 0);
    }

    #[test]
    fn window_is_bounded() {
        let mut sync: ApproximateTimeSynchronizer<u32> = ApproximateTimeSynchronizer::new(
            vec![StreamSpec::stamped("scan"), StreamSpec::stamped("pose")],
            3,
            0.01,
        );
        for i in 0..10 {
            assert!(sync.add(0, Some(i as f64), i).unwrap().is_none());
        }
        assert_eq!(sync.pending(0), 3);
        assert_eq!(sync.dropped(), 7);
    }

    #[test]
    fn stamped_stream_rejects_missing_or_nan_stamp() {
        let mut sync = triple(0.05);
        assert!(matches!(
            sync.add(SCAN, None, "scan".to_string()),
            Err(ArenaError::Channel(_))
        ));
        assert!(matches!(
            sync.add(POSE, Some(f64::NAN), "pose".to_string()),
            Err(ArenaError::Channel(_))
        ));
        assert!(matches!(
            sync.add(7, Some(1.0), "ghost".to_string()),
            Err(ArenaError::Channel(_))
        ));
    }

    #[test]
    fn out_of_order_arrival_still_matches() {
        let mut sync = triple(0.05);
        add(&mut sync, CMD, None, "cmd");
        add(&mut sync, POSE, Some(5.04), "pose@5.04");
        let tuple = add(&mut sync, SCAN, Some(5.00), "scan@5.00").unwrap();
        assert_eq!(tuple, vec!["scan@5.00", "pose@5.04", "cmd"]);
    }

    #[test]
    fn clear_forgets_pending_messages() {
        let mut sync = triple(0.05);
        add(&mut sync, CMD, None, "cmd");
        add(&mut sync, SCAN, Some(1.0), "scan");
        sync.clear();
        assert_eq!(sync.pending(SCAN), 0);
        assert_eq!(sync.pending(CMD), 0);
        assert!(add(&mut sync, POSE, Some(1.0), "pose").is_none());
    }
}
