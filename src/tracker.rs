use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::types::{ChannelState, ChannelTag, MeasurementUpdate};

/// Per-channel measurement state for one session
///
/// Each tracked channel owns a [`watch`] channel holding its [`ChannelState`].
/// Updates are applied through the sender, so mutation of a channel is
/// serialized and every waiter observes either the state before or after an
/// update, never a partial one.
///
/// A channel latches once a final update has been applied; later updates on
/// that channel are ignored so post-measurement frames cannot overwrite the
/// settled value.
#[derive(Debug)]
pub struct StabilityTracker {
    channels: HashMap<ChannelTag, watch::Sender<ChannelState>>,
}

impl StabilityTracker {
    /// Create a tracker with a fresh state for each of `channels`
    pub fn new(channels: impl IntoIterator<Item = ChannelTag>) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel, watch::Sender::new(ChannelState::default())))
            .collect();

        Self { channels }
    }

    /// Whether `channel` is tracked by this session
    #[must_use]
    pub fn tracks(&self, channel: ChannelTag) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Apply an update to its channel and return the resulting state
    ///
    /// Returns `None` if the update's channel is not tracked.
    pub fn apply(&self, update: MeasurementUpdate) -> Option<ChannelState> {
        let sender = self.channels.get(&update.channel)?;

        let changed = sender.send_if_modified(|state| {
            if state.is_stable {
                return false;
            }

            let before = *state;
            state.last_value = Some(update.raw_value);
            state.is_stable = update.is_final;
            *state != before
        });

        let state = *sender.borrow();
        if changed && state.is_stable {
            info!(channel = %update.channel, weight = %update.raw_value, "Channel stabilized");
        } else if !changed && state.is_stable {
            debug!(channel = %update.channel, "Ignoring update on stabilized channel");
        }

        Some(state)
    }

    /// Snapshot of a channel's state
    #[must_use]
    pub fn state(&self, channel: ChannelTag) -> Option<ChannelState> {
        self.channels.get(&channel).map(|sender| *sender.borrow())
    }

    /// Subscribe to state changes of a channel
    #[must_use]
    pub fn watch(&self, channel: ChannelTag) -> Option<watch::Receiver<ChannelState>> {
        self.channels.get(&channel).map(watch::Sender::subscribe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Weight;

    fn update(channel: ChannelTag, grams: u32, is_final: bool) -> MeasurementUpdate {
        MeasurementUpdate {
            channel,
            raw_value: Weight::from_grams(grams),
            is_final,
        }
    }

    #[test]
    fn test_fresh_state() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);
        assert!(tracker.tracks(ChannelTag::StableWeight));
        assert!(!tracker.tracks(ChannelTag::Bia));
        assert_eq!(
            tracker.state(ChannelTag::StableWeight),
            Some(ChannelState::default())
        );
    }

    #[test]
    fn test_values_follow_until_final() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);

        let state = tracker
            .apply(update(ChannelTag::StableWeight, 70_000, false))
            .unwrap();
        assert_eq!(state.last_value, Some(Weight::from_grams(70_000)));
        assert!(!state.is_stable);

        let state = tracker
            .apply(update(ChannelTag::StableWeight, 77_056, true))
            .unwrap();
        assert_eq!(state.last_value, Some(Weight::from_grams(77_056)));
        assert!(state.is_stable);
    }

    #[test]
    fn test_stable_channel_is_latched() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);
        tracker.apply(update(ChannelTag::StableWeight, 77_056, true));

        for (grams, is_final) in [(0, false), (12_345, true), (262_143, false)] {
            let state = tracker
                .apply(update(ChannelTag::StableWeight, grams, is_final))
                .unwrap();
            assert_eq!(state.last_value, Some(Weight::from_grams(77_056)));
            assert!(state.is_stable);
        }
    }

    #[test]
    fn test_channels_are_independent() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight, ChannelTag::Bia]);

        tracker.apply(update(ChannelTag::Bia, 76_900, true));

        assert_eq!(
            tracker.state(ChannelTag::StableWeight),
            Some(ChannelState::default())
        );
        assert!(tracker.state(ChannelTag::Bia).unwrap().is_stable);
    }

    #[test]
    fn test_untracked_channel_is_ignored() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);
        assert_eq!(tracker.apply(update(ChannelTag::Bia, 76_900, true)), None);
        assert_eq!(tracker.state(ChannelTag::Bia), None);
        assert!(tracker.watch(ChannelTag::Bia).is_none());
    }

    #[tokio::test]
    async fn test_watchers_are_notified_on_latch() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);
        let mut receiver = tracker.watch(ChannelTag::StableWeight).unwrap();

        let waiter = tokio::spawn(async move {
            receiver
                .wait_for(|state| state.is_stable)
                .await
                .map(|state| *state)
                .unwrap()
        });

        tracker.apply(update(ChannelTag::StableWeight, 70_000, false));
        tracker.apply(update(ChannelTag::StableWeight, 77_056, true));

        let state = waiter.await.unwrap();
        assert_eq!(state.last_value, Some(Weight::from_grams(77_056)));
    }

    #[tokio::test]
    async fn test_dropping_tracker_closes_watchers() {
        let tracker = StabilityTracker::new([ChannelTag::StableWeight]);
        let mut receiver = tracker.watch(ChannelTag::StableWeight).unwrap();
        drop(tracker);

        assert!(receiver.wait_for(|state| state.is_stable).await.is_err());
    }
}
