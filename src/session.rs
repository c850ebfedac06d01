use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{Result, ScaleError},
    protocol,
    tracker::StabilityTracker,
    transport::ScaleTransport,
    types::{
        ChannelState, ChannelTag, RawFrame, SessionConfig, SessionPhase, SessionResult,
        SessionStatus, Weight,
    },
};

/// A single weighing, from subscription to reconciled result
///
/// The session subscribes the channels its [`SessionConfig`] asks for, waits
/// for the weight to settle and, if requested, for the BIA result, each under
/// its own timeout. It then compares the two readings:
///
/// - Weight only: [`SessionStatus::Confirmed`]
/// - Weight and BIA agree to the gram: [`SessionStatus::Confirmed`]
/// - Weight and BIA disagree: [`SessionStatus::Mismatch`], both reported
/// - BIA requested but never arrived: [`SessionStatus::PartialTimeout`]
/// - Weight never settled: [`SessionStatus::NoStableWeight`]
///
/// Malformed frames are dropped. Losing the connection while waiting ends the
/// session with [`ScaleError::Disconnected`].
///
/// # Examples
///
/// ```no_run
/// use gofit_s2::{ble::BleManager, ConnectionParams, MeasurementSession, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = BleManager::new().await?;
///     let mut connection = manager.connect(&ConnectionParams::default()).await?;
///
///     let mut session = MeasurementSession::new(SessionConfig::default().with_bia(true));
///     let result = session.run(&mut connection).await?;
///     println!("{result}");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MeasurementSession {
    config: SessionConfig,
    phase: SessionPhase,
}

impl MeasurementSession {
    /// Create a session with the given configuration
    #[must_use]
    pub const fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: SessionPhase::AwaitingStableWeight,
        }
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Run the session over `transport`
    ///
    /// Logs exactly one summary line for the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ScaleError::InvalidParameters`] for a rejected configuration,
    /// [`ScaleError::Protocol`] if the transport's frames were already taken,
    /// [`ScaleError::SubscriptionFailed`] if a channel cannot be subscribed,
    /// or [`ScaleError::Disconnected`] if the connection drops while waiting.
    /// Timeouts are not errors; they are reported in [`SessionResult::status`].
    pub async fn run<T>(&mut self, transport: &mut T) -> Result<SessionResult>
    where
        T: ScaleTransport + ?Sized,
    {
        let outcome = self.execute(transport).await;
        self.enter(SessionPhase::Done);

        match &outcome {
            Ok(result) if result.is_confirmed() => info!("{result}"),
            Ok(result) => warn!("{result}"),
            Err(e) => error!("Measurement failed: {e}"),
        }

        outcome
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(%phase, "Session phase");
        self.phase = phase;
    }

    async fn execute<T>(&mut self, transport: &mut T) -> Result<SessionResult>
    where
        T: ScaleTransport + ?Sized,
    {
        self.config.validate()?;
        let frames = transport.frames()?;

        let channels = self.config.channels();
        for (index, &channel) in channels.iter().enumerate() {
            info!(%channel, uuid = %channel.uuid(), "Starting notifications");
            if let Err(e) = transport.subscribe(channel).await {
                unsubscribe_all(transport, &channels[..index]).await;
                return Err(subscription_error(channel, e));
            }
        }

        let tracker = StabilityTracker::new(
            channels
                .into_iter()
                .filter(|channel| *channel != ChannelTag::ServiceChange),
        );
        let mut weight = tracker.watch(ChannelTag::StableWeight).ok_or_else(|| {
            ScaleError::Protocol("stable weight channel is not tracked".to_string())
        })?;
        let bia = tracker.watch(ChannelTag::Bia);

        let _dispatcher = Dispatcher::spawn(frames, tracker);

        self.enter(SessionPhase::AwaitingStableWeight);
        let stable_weight = match wait_until_stable(
            &mut weight,
            ChannelTag::StableWeight,
            self.config.stable_timeout(),
        )
        .await?
        {
            WaitOutcome::Stable(value) => value,
            WaitOutcome::TimedOut(last) => return Ok(SessionResult::no_stable_weight(last)),
        };

        let bia_weight = match bia {
            Some(mut bia) => {
                self.enter(SessionPhase::AwaitingBia);
                match wait_until_stable(&mut bia, ChannelTag::Bia, self.config.bia_timeout())
                    .await?
                {
                    WaitOutcome::Stable(value) => Some(value),
                    WaitOutcome::TimedOut(_) => None,
                }
            }
            None => None,
        };

        self.enter(SessionPhase::Reconciling);
        Ok(reconcile(stable_weight, bia_weight, self.config.measure_bia))
    }
}

/// Run a single measurement session over `transport`
///
/// # Errors
///
/// See [`MeasurementSession::run`].
pub async fn run_session<T>(transport: &mut T, config: &SessionConfig) -> Result<SessionResult>
where
    T: ScaleTransport + ?Sized,
{
    MeasurementSession::new(config.clone()).run(transport).await
}

/// Compare a settled weight with the BIA weight, if any
#[must_use]
pub fn reconcile(stable_weight: Weight, bia_weight: Option<Weight>, bia_requested: bool) -> SessionResult {
    let status = match bia_weight {
        Some(bia) if bia == stable_weight => SessionStatus::Confirmed,
        Some(_) => SessionStatus::Mismatch,
        None if bia_requested => SessionStatus::PartialTimeout,
        None => SessionStatus::Confirmed,
    };

    SessionResult {
        stable_weight: Some(stable_weight),
        bia_weight,
        status,
        last_observed: Some(stable_weight),
    }
}

enum WaitOutcome {
    Stable(Weight),
    TimedOut(Option<Weight>),
}

async fn wait_until_stable(
    receiver: &mut watch::Receiver<ChannelState>,
    channel: ChannelTag,
    limit: Duration,
) -> Result<WaitOutcome> {
    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
    info!(%channel, timeout_ms, "Waiting for measurement to stabilize");

    let settled = timeout(limit, receiver.wait_for(|state| state.is_stable))
        .await
        .map(|waited| waited.map(|state| *state));

    match settled {
        Ok(Ok(state)) => state.settled_value().map(WaitOutcome::Stable).ok_or_else(|| {
            ScaleError::Protocol(format!("{channel} channel stabilized without a value"))
        }),
        Ok(Err(_)) => {
            warn!(%channel, "Notification stream ended while waiting");
            Err(ScaleError::Disconnected)
        }
        Err(_) => {
            let last = receiver.borrow().last_value;
            warn!(%channel, timeout_ms, last = ?last, "Timed out waiting for measurement");
            Ok(WaitOutcome::TimedOut(last))
        }
    }
}

async fn unsubscribe_all<T>(transport: &mut T, channels: &[ChannelTag])
where
    T: ScaleTransport + ?Sized,
{
    for &channel in channels {
        if let Err(e) = transport.unsubscribe(channel).await {
            warn!(%channel, "Failed to stop notifications: {e}");
        }
    }
}

fn subscription_error(channel: ChannelTag, error: ScaleError) -> ScaleError {
    match error {
        e @ ScaleError::SubscriptionFailed { .. } => e,
        other => ScaleError::SubscriptionFailed {
            channel,
            reason: other.to_string(),
        },
    }
}

/// Decodes frames into the tracker until the queue closes
///
/// Aborted on drop so that nothing keeps writing to a finished session.
struct Dispatcher(JoinHandle<()>);

impl Dispatcher {
    fn spawn(mut frames: mpsc::UnboundedReceiver<RawFrame>, tracker: StabilityTracker) -> Self {
        Self(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                dispatch(&tracker, &frame);
            }
            debug!("Notification stream closed");
        }))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn dispatch(tracker: &StabilityTracker, frame: &RawFrame) {
    trace!(channel = %frame.channel, "Received data {:02X?}", &frame.data[..]);

    match protocol::decode(frame) {
        Ok(Some(update)) => {
            debug!(
                channel = %update.channel,
                weight = %update.raw_value,
                grams = update.raw_value.grams(),
                is_final = update.is_final,
                "Decoded {:02X?}",
                &frame.data[..]
            );
            if tracker.apply(update).is_none() {
                debug!(channel = %update.channel, "Ignoring update for unsubscribed channel");
            }
        }
        Ok(None) => trace!(channel = %frame.channel, "Frame carries no measurement"),
        Err(e) => debug!("Dropping frame: {e}"),
    }
}
