use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use greenhouse_common::{Error, Result};
use greenhouse_config::AppConfig;
use greenhouse_db::ReadingSource;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::limiter::{LimiterConfig, ReadingLimiter, estimate_tokens};
use crate::prompt::{self, SYSTEM_PROMPT};
use crate::providers::{ChatMessage, LlmProvider, LlmRequest};

/// Destination for relayed advice text.
///
/// Implementations have exactly one writer; the streamer is that writer for
/// the lifetime of a request.
#[async_trait]
pub trait AdviceSink: Send + Sync {
    /// Deliver one fragment, waiting while the reader is behind.
    async fn write(&mut self, fragment: &str) -> Result<()>;

    /// Resolves once the reading side has gone away.
    async fn closed(&self);
}

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub limiter: LimiterConfig,
    pub lookback: Duration,
    pub deadline: Duration,
    pub model: String,
    pub max_response_tokens: u32,
}

impl From<&AppConfig> for StreamerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            limiter: LimiterConfig::from(&config.advice),
            lookback: config.advice.lookback(),
            deadline: config.advice.deadline(),
            model: config.llm.model.clone(),
            max_response_tokens: config.llm.max_response_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    FetchingReadings,
    Building,
    AwaitingUpstream,
    Relaying,
    Completed,
    Failed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::FetchingReadings => "fetching_readings",
            StreamState::Building => "building",
            StreamState::AwaitingUpstream => "awaiting_upstream",
            StreamState::Relaying => "relaying",
            StreamState::Completed => "completed",
            StreamState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal result of one advice request.
#[derive(Debug)]
pub enum StreamOutcome {
    Completed,
    UpstreamFailed(Error),
    SourceFailed(Error),
    DeadlineExceeded(Duration),
    ClientDisconnected,
}

impl StreamOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => StreamOutcome::Completed,
            Err(e @ Error::Source(_)) => StreamOutcome::SourceFailed(e),
            Err(Error::DeadlineExceeded(d)) => StreamOutcome::DeadlineExceeded(d),
            Err(Error::ClientDisconnected) => StreamOutcome::ClientDisconnected,
            Err(e) => StreamOutcome::UpstreamFailed(e),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            StreamOutcome::Completed => Ok(()),
            StreamOutcome::UpstreamFailed(e) | StreamOutcome::SourceFailed(e) => Err(e),
            StreamOutcome::DeadlineExceeded(d) => Err(Error::DeadlineExceeded(d)),
            StreamOutcome::ClientDisconnected => Err(Error::ClientDisconnected),
        }
    }
}

/// Per-request bookkeeping. Lives only for one `run`.
struct StreamSession<'a> {
    plant: &'a str,
    state: StreamState,
    relayed_bytes: usize,
}

impl StreamSession<'_> {
    fn enter(&mut self, next: StreamState) {
        debug!(plant = self.plant, from = %self.state, to = %next, "advice stream transition");
        self.state = next;
    }
}

/// Drives fetch -> limit -> prompt -> upstream stream -> sink for one plant.
pub struct AdviceStreamer {
    source: Arc<dyn ReadingSource>,
    provider: Arc<dyn LlmProvider>,
    limiter: ReadingLimiter,
    config: StreamerConfig,
}

impl AdviceStreamer {
    pub fn new(
        source: Arc<dyn ReadingSource>,
        provider: Arc<dyn LlmProvider>,
        config: StreamerConfig,
    ) -> Self {
        Self {
            source,
            provider,
            limiter: ReadingLimiter::new(config.limiter),
            config,
        }
    }

    /// Deadline for a request starting now. Fails when the configured
    /// deadline does not fit the monotonic clock.
    pub fn deadline_from_now(&self) -> Result<Instant> {
        Instant::now().checked_add(self.config.deadline).ok_or_else(|| {
            Error::Config(format!(
                "advice deadline of {}s is out of range",
                self.config.deadline.as_secs()
            ))
        })
    }

    /// Stream advice for `plant` into `sink`, bounded by `deadline`.
    ///
    /// Whatever was written to the sink before a failure stays written. The
    /// upstream stream is owned by this call and dropped before it returns on
    /// every path, including deadline expiry.
    pub async fn run(
        &self,
        plant: &str,
        deadline: Instant,
        sink: &mut dyn AdviceSink,
    ) -> StreamOutcome {
        let started = Instant::now();
        let mut session = StreamSession {
            plant,
            state: StreamState::Idle,
            relayed_bytes: 0,
        };

        let result = match tokio::time::timeout_at(deadline, self.drive(&mut session, sink)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(
                deadline.saturating_duration_since(started),
            )),
        };

        let outcome = StreamOutcome::from_result(result);
        session.enter(if outcome.is_completed() {
            StreamState::Completed
        } else {
            StreamState::Failed
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            StreamOutcome::Completed => info!(
                plant,
                relayed_bytes = session.relayed_bytes,
                elapsed_ms,
                "advice stream completed"
            ),
            StreamOutcome::ClientDisconnected => info!(
                plant,
                relayed_bytes = session.relayed_bytes,
                elapsed_ms,
                "advice client disconnected"
            ),
            StreamOutcome::DeadlineExceeded(d) => warn!(
                plant,
                relayed_bytes = session.relayed_bytes,
                deadline_ms = d.as_millis() as u64,
                "advice stream deadline exceeded"
            ),
            StreamOutcome::SourceFailed(e) | StreamOutcome::UpstreamFailed(e) => warn!(
                plant,
                relayed_bytes = session.relayed_bytes,
                error = %e,
                "advice stream failed"
            ),
        }

        outcome
    }

    async fn drive(&self, session: &mut StreamSession<'_>, sink: &mut dyn AdviceSink) -> Result<()> {
        session.enter(StreamState::FetchingReadings);
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .map_err(|e| Error::Source(format!("invalid look-back window: {e}")))?;
        let since = Utc::now()
            .checked_sub_signed(lookback)
            .ok_or_else(|| Error::Source("look-back window reaches before the supported date range".into()))?;
        let readings = until_closed(&*sink, self.source.fetch_readings_since(since))
            .await
            .map_err(|e| match e {
                Error::ClientDisconnected | Error::Source(_) => e,
                other => Error::Source(other.to_string()),
            })?;

        session.enter(StreamState::Building);
        let fetched = readings.len();
        let limited = self.limiter.limit(readings);
        let prompt = prompt::build(session.plant, &limited);
        info!(
            plant = session.plant,
            original_readings = fetched,
            limited_readings = limited.len(),
            estimated_tokens = estimate_tokens(&prompt, self.limiter.config().tokens_per_char),
            "advice prompt built"
        );

        session.enter(StreamState::AwaitingUpstream);
        debug!(
            plant = session.plant,
            provider = self.provider.provider_id(),
            model = %self.config.model,
            "opening advice stream"
        );
        let request = LlmRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            system: Some(SYSTEM_PROMPT.to_string()),
            max_tokens: Some(self.config.max_response_tokens),
            temperature: None,
        };
        let mut stream = until_closed(&*sink, self.provider.complete_stream(&request))
            .await
            .map_err(|e| match e {
                Error::ClientDisconnected | Error::UpstreamOpen(_) => e,
                other => Error::UpstreamOpen(other.to_string()),
            })?;

        session.enter(StreamState::Relaying);
        loop {
            let next = tokio::select! {
                item = stream.next() => item,
                _ = sink.closed() => return Err(Error::ClientDisconnected),
            };

            match next {
                None => return Ok(()),
                Some(Ok(chunk)) => {
                    if chunk.delta.is_empty() {
                        continue;
                    }
                    sink.write(&chunk.delta)
                        .await
                        .map_err(|_| Error::ClientDisconnected)?;
                    session.relayed_bytes += chunk.delta.len();
                }
                Some(Err(e @ Error::UpstreamStream(_))) => return Err(e),
                Some(Err(other)) => return Err(Error::UpstreamStream(other.to_string())),
            }
        }
    }
}

/// Run `fut` unless the sink's reader hangs up first.
async fn until_closed<T>(
    sink: &dyn AdviceSink,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = fut => result,
        _ = sink.closed() => Err(Error::ClientDisconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_map_onto_error_taxonomy() {
        assert!(StreamOutcome::from_result(Ok(())).is_completed());
        assert!(matches!(
            StreamOutcome::from_result(Err(Error::Source("x".into()))),
            StreamOutcome::SourceFailed(_)
        ));
        assert!(matches!(
            StreamOutcome::from_result(Err(Error::UpstreamStream("x".into()))),
            StreamOutcome::UpstreamFailed(_)
        ));
        assert!(matches!(
            StreamOutcome::from_result(Err(Error::ClientDisconnected)),
            StreamOutcome::ClientDisconnected
        ));
        assert!(matches!(
            StreamOutcome::DeadlineExceeded(Duration::from_secs(1)).into_result(),
            Err(Error::DeadlineExceeded(_))
        ));
    }

    #[test]
    fn streamer_config_follows_app_config() {
        let app = AppConfig::default();
        let config = StreamerConfig::from(&app);
        assert_eq!(config.lookback, Duration::from_secs(6 * 3600));
        assert_eq!(config.deadline, Duration::from_secs(60));
        assert_eq!(config.limiter, LimiterConfig::default());
        assert_eq!(config.max_response_tokens, 1000);
    }
}
