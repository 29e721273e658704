//! Streaming relay coordinator.
//!
//! [`RelayCoordinator::start`] validates the request, creates the empty
//! assistant message, opens the provider stream and waits for its first item.
//! Anything that fails up to that point is returned as an [`AppError`] so the
//! handler can answer with a plain HTTP status. [`Relay::run`] then drives the stream to one of its end
//! states and always finishes with the same finalize sequence.

use super::channel::{ClientChannel, Frame};
use super::checkpoint::CheckpointScheduler;
use super::session::RelaySession;
use crate::config::RelayConfig;
use crate::models::{Message, NewMessage, Role};
use crate::services::metrics;
use crate::services::providers::{
    CancelHandle, ChatMessage, ChatProvider, CompletionStream, GenerationParams, ProviderError,
};
use crate::services::store::{load_accessible_chat, resolve_model, ChatStore};
use futures::StreamExt;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const TIMEOUT_MESSAGE: &str = "stream timed out";

/// Lifecycle of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Preparing,
    Streaming,
    Finalizing,
    Closed,
    Failed,
}

/// How the streaming phase ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The provider signalled the end of its reply.
    Completed,
    /// The client went away.
    Interrupted,
    /// The reply exceeded the configured stream timeout.
    TimedOut,
    /// The provider raised an error.
    Failed(ProviderError),
}

impl RelayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Interrupted => "interrupted",
            RelayOutcome::TimedOut => "timed_out",
            RelayOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub checkpoint_interval: Duration,
    pub stream_timeout: Duration,
    pub channel_capacity: usize,
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            checkpoint_interval: config.checkpoint_interval(),
            stream_timeout: config.stream_timeout(),
            channel_capacity: config.channel_capacity,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// A validated request for a streamed assistant reply.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub chat_id: Uuid,
    /// Catalog `value` of the requested model.
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Summary of a finished relay.
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub message_id: Uuid,
    pub outcome: RelayOutcome,
    pub content: String,
    pub fragments: usize,
    pub state: RelayState,
}

/// Starts relays. Cheap to clone; holds only shared collaborators.
#[derive(Clone)]
pub struct RelayCoordinator {
    store: Arc<dyn ChatStore>,
    provider: Arc<dyn ChatProvider>,
    settings: RelaySettings,
}

impl RelayCoordinator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        provider: Arc<dyn ChatProvider>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Prepare a relay, open the provider stream and pull its first item.
    ///
    /// Validation failures happen before anything is written. Once the
    /// placeholder exists, later failures still finalize the session before
    /// the error is returned. A provider that errors or stays silent before
    /// its first fragment fails here, while no frame has been sent.
    #[instrument(skip(self, request), fields(chat_id = %request.chat_id, model = %request.model))]
    pub async fn start(&self, user_id: Uuid, request: StreamRequest) -> Result<Relay, AppError> {
        let store = self.store.as_ref();

        let chat = load_accessible_chat(store, request.chat_id, user_id).await?;
        let model = resolve_model(store, &request.model).await?;

        let placeholder = store
            .create_message(&NewMessage::assistant_placeholder(
                chat.id,
                model.id,
                request.temperature,
            ))
            .await?;
        let mut session = RelaySession::new(chat.id, placeholder.id);

        let history = match store.list_messages(chat.id).await {
            Ok(messages) => provider_history(&messages, Some(placeholder.id)),
            Err(e) => {
                abandon(store, &mut session).await;
                return Err(e);
            }
        };

        let params = GenerationParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut stream = match self.provider.stream(&model.value, &history, &params).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_provider_error(e.kind());
                warn!(error = %e, kind = e.kind(), "Provider refused to open stream");
                abandon(store, &mut session).await;
                return Err(e.into());
            }
        };

        let opened_at = time::Instant::now();
        let primed = match time::timeout(self.settings.stream_timeout, stream.next()).await {
            Ok(Some(Ok(fragment))) => Primed::Fragment(fragment),
            Ok(None) => Primed::Ended,
            Ok(Some(Err(e))) => {
                metrics::record_provider_error(e.kind());
                warn!(error = %e, kind = e.kind(), "Provider failed before the first fragment");
                stream.release();
                abandon(store, &mut session).await;
                return Err(e.into());
            }
            Err(_) => {
                warn!("Provider produced nothing before the stream timeout");
                stream.release();
                abandon(store, &mut session).await;
                return Err(AppError::ServiceUnavailable(TIMEOUT_MESSAGE.to_string()));
            }
        };

        info!(
            message_id = %placeholder.id,
            history_len = history.len(),
            "Relay prepared"
        );

        Ok(Relay {
            store: Arc::clone(&self.store),
            session,
            stream,
            primed: Some(primed),
            opened_at,
            scheduler: CheckpointScheduler::new(),
            settings: self.settings.clone(),
            state: RelayState::Preparing,
        })
    }
}

/// Conversation history as sent to the provider.
///
/// Skips `exclude` (the message being generated) and assistant messages left
/// empty by earlier relays that produced nothing.
pub fn provider_history(messages: &[Message], exclude: Option<Uuid>) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| Some(m.id) != exclude)
        .filter(|m| !(m.role == Role::Assistant && m.content.is_empty()))
        .map(|m| ChatMessage::new(m.role, m.content.clone()))
        .collect()
}

/// Finalize a session that never reached streaming.
async fn abandon(store: &dyn ChatStore, session: &mut RelaySession) {
    if let Err(e) = session.flush(store, "final").await {
        error!(message_id = %session.message_id(), error = %e, "Final flush failed");
    }
    session.close();
    metrics::record_relay_outcome("failed");
}

/// First item pulled from the stream by `start`.
enum Primed {
    Fragment(String),
    Ended,
}

/// An open relay, ready to be driven against a client channel.
pub struct Relay {
    store: Arc<dyn ChatStore>,
    session: RelaySession,
    stream: CompletionStream,
    primed: Option<Primed>,
    opened_at: time::Instant,
    scheduler: CheckpointScheduler,
    settings: RelaySettings,
    state: RelayState,
}

impl Relay {
    pub fn message_id(&self) -> Uuid {
        self.session.message_id()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.stream.cancel_handle()
    }

    fn transition(&mut self, next: RelayState) {
        debug!(
            message_id = %self.session.message_id(),
            from = ?self.state,
            to = ?next,
            "Relay state change"
        );
        self.state = next;
    }

    /// Forward fragments to `channel` until the stream ends, the client
    /// disconnects, or the stream timeout elapses, then finalize.
    #[instrument(skip_all, fields(chat_id = %self.session.chat_id(), message_id = %self.session.message_id()))]
    pub async fn run(mut self, mut channel: ClientChannel) -> RelayReport {
        metrics::inc_relays_in_flight();

        let cancel = self.stream.cancel_handle();
        let deadline = time::sleep_until(self.opened_at + self.settings.stream_timeout);
        tokio::pin!(deadline);

        self.scheduler.arm(self.settings.checkpoint_interval);
        self.transition(RelayState::Streaming);

        let early = match self.primed.take() {
            Some(Primed::Fragment(fragment)) => self.forward(&mut channel, &cancel, fragment).await,
            Some(Primed::Ended) => Some(RelayOutcome::Completed),
            None => None,
        };

        let outcome = if let Some(outcome) = early {
            outcome
        } else {
            loop {
                tokio::select! {
                    biased;

                    _ = channel.closed() => {
                        self.session.cancel();
                        cancel.cancel();
                        break RelayOutcome::Interrupted;
                    }
                    _ = &mut deadline => {
                        self.session.cancel();
                        cancel.cancel();
                        break RelayOutcome::TimedOut;
                    }
                    _ = self.scheduler.tick() => {
                        if let Err(e) = self.session.flush(self.store.as_ref(), "checkpoint").await {
                            warn!(error = %e, "Checkpoint write failed, will retry");
                        }
                    }
                    next = self.stream.next() => match next {
                        Some(Ok(fragment)) => {
                            if let Some(outcome) = self.forward(&mut channel, &cancel, fragment).await {
                                break outcome;
                            }
                        }
                        Some(Err(e)) => break RelayOutcome::Failed(e),
                        None => break RelayOutcome::Completed,
                    },
                }
            }
        };

        self.finalize(&mut channel, outcome).await
    }

    /// Buffer one fragment and send it on. Returns the end state when the
    /// client is gone.
    async fn forward(
        &mut self,
        channel: &mut ClientChannel,
        cancel: &CancelHandle,
        fragment: String,
    ) -> Option<RelayOutcome> {
        if !channel.is_open() {
            self.session.cancel();
            cancel.cancel();
            return Some(RelayOutcome::Interrupted);
        }
        self.session.append(&fragment);
        metrics::record_fragment();
        // Appended before sending: a failed send still keeps this fragment in
        // the final flush.
        if channel.send(Frame::Content(fragment)).await.is_err() {
            self.session.cancel();
            cancel.cancel();
            return Some(RelayOutcome::Interrupted);
        }
        None
    }

    async fn finalize(mut self, channel: &mut ClientChannel, outcome: RelayOutcome) -> RelayReport {
        if let RelayOutcome::Failed(e) = &outcome {
            metrics::record_provider_error(e.kind());
            warn!(error = %e, kind = e.kind(), "Provider stream failed");
            self.transition(RelayState::Failed);
        }
        self.transition(RelayState::Finalizing);

        self.scheduler.disarm();
        if let Err(e) = self.session.flush(self.store.as_ref(), "final").await {
            error!(error = %e, "Final flush failed, partial reply may be incomplete");
        }
        self.session.close();

        if let Err(e) = self.store.touch_chat(self.session.chat_id()).await {
            warn!(error = %e, "Failed to bump chat last_updated");
        }

        let terminal = match &outcome {
            RelayOutcome::Completed => Some(Frame::Done),
            RelayOutcome::Interrupted => None,
            RelayOutcome::TimedOut => Some(Frame::Error(TIMEOUT_MESSAGE.to_string())),
            RelayOutcome::Failed(e) => Some(Frame::Error(AppError::from(e.clone()).to_string())),
        };
        if let Some(frame) = terminal {
            if channel.is_open() && channel.send(frame).await.is_err() {
                debug!("Client left before the terminal frame");
            }
        }

        self.stream.release();
        self.transition(RelayState::Closed);

        metrics::record_relay_outcome(outcome.label());
        metrics::dec_relays_in_flight();
        info!(
            outcome = outcome.label(),
            fragments = self.session.fragments(),
            content_len = self.session.content().len(),
            "Relay finished"
        );

        RelayReport {
            message_id: self.session.message_id(),
            fragments: self.session.fragments(),
            state: self.state,
            content: self.session.into_content(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, ModelEntry};
    use crate::services::providers::mock::{MockProvider, MockStep};
    use crate::services::store::MemoryStore;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryStore>,
        user_id: Uuid,
        chat: Chat,
        model: ModelEntry,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let chat = Chat::new(user_id);
        let model = ModelEntry::new("Model One", "m1");
        store.insert_chat(chat.clone()).await;
        store.insert_model(model.clone()).await;
        store
            .create_message(&NewMessage::user(chat.id, model.id, "Say hello"))
            .await
            .unwrap();
        Fixture {
            store,
            user_id,
            chat,
            model,
        }
    }

    fn coordinator(
        fx: &Fixture,
        provider: &Arc<MockProvider>,
        settings: RelaySettings,
    ) -> RelayCoordinator {
        RelayCoordinator::new(
            fx.store.clone() as Arc<dyn ChatStore>,
            provider.clone() as Arc<dyn ChatProvider>,
            settings,
        )
    }

    fn request(fx: &Fixture) -> StreamRequest {
        StreamRequest {
            chat_id: fx.chat.id,
            model: fx.model.value.clone(),
            max_tokens: Some(500),
            temperature: Some(0.2),
        }
    }

    async fn drain(mut rx: mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    fn content(text: &str) -> Frame {
        Frame::Content(text.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn completed_stream_persists_every_fragment() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_fragments(["Hel", "lo", " world"]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(report.content, "Hello world");
        assert_eq!(
            drain(rx).await,
            vec![content("Hel"), content("lo"), content(" world"), Frame::Done]
        );

        let stored = fx.store.message(message_id).await.unwrap();
        assert_eq!(stored.content, "Hello world");
        assert_eq!(stored.role, Role::Assistant);
        assert_eq!(stored.temperature, Some(0.2));

        let requests = provider.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "m1");
        assert_eq!(requests[0].params.max_tokens, Some(500));
        assert_eq!(requests[0].params.temperature, Some(0.2));
        assert_eq!(
            requests[0].history,
            vec![ChatMessage::new(Role::User, "Say hello")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_keeps_forwarded_fragments_only() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("Hel".into()),
            MockStep::Delay(Duration::from_millis(200)),
            MockStep::Fragment("lo".into()),
            MockStep::Fragment(" world".into()),
        ]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, mut rx) = ClientChannel::pair(1);
        let task = tokio::spawn(relay.run(channel));

        assert_eq!(rx.recv().await, Some(content("Hel")));
        drop(rx);
        let report = task.await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Interrupted);
        assert_eq!(report.content, "Hel");
        assert_eq!(fx.store.message(message_id).await.unwrap().content, "Hel");
        assert_eq!(fx.store.content_writes(message_id).await, vec!["Hel"]);

        let handles = provider.cancel_handles().await;
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].requests(), 1);
        assert!(handles[0].is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_follow_the_timer_and_skip_idle_ticks() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("a".into()),
            MockStep::Delay(Duration::from_millis(1500)),
            MockStep::Fragment("b".into()),
            MockStep::Delay(Duration::from_millis(1000)),
            MockStep::Fragment("c".into()),
            MockStep::Delay(Duration::from_millis(2000)),
        ]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert_eq!(report.outcome, RelayOutcome::Completed);
        let writes = fx.store.content_writes(message_id).await;
        assert_eq!(writes, vec!["a", "ab", "abc"]);
        assert!(writes.windows(2).all(|w| w[0] != w[1]));
        assert_eq!(drain(rx).await.last(), Some(&Frame::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_checkpoint_is_superseded_by_final_flush() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("a".into()),
            MockStep::Delay(Duration::from_millis(1500)),
            MockStep::Fragment("b".into()),
        ]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();
        fx.store.fail_next_content_writes(1).await;

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(fx.store.content_writes(message_id).await, vec!["ab"]);
        assert_eq!(
            drain(rx).await,
            vec![content("a"), content("b"), Frame::Done]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_mid_stream_flushes_partial_reply() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("par".into()),
            MockStep::Fail(ProviderError::Unavailable("upstream reset".into())),
        ]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert!(matches!(report.outcome, RelayOutcome::Failed(ProviderError::Unavailable(_))));
        assert_eq!(report.state, RelayState::Closed);
        assert_eq!(fx.store.message(message_id).await.unwrap().content, "par");

        let frames = drain(rx).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], content("par"));
        assert!(matches!(&frames[1], Frame::Error(msg) if msg.contains("unavailable")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_upstream_and_reports_error() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("slow".into()),
            MockStep::Hang,
        ]));
        let settings = RelaySettings {
            stream_timeout: Duration::from_secs(5),
            ..RelaySettings::default()
        };
        let relay = coordinator(&fx, &provider, settings)
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert_eq!(report.outcome, RelayOutcome::TimedOut);
        assert_eq!(fx.store.message(message_id).await.unwrap().content, "slow");
        assert_eq!(
            drain(rx).await,
            vec![content("slow"), Frame::Error(TIMEOUT_MESSAGE.into())]
        );
        assert_eq!(provider.cancel_handles().await[0].requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_written_after_close() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_fragments(["done"]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();
        let handle = relay.cancel_handle();

        let (channel, _rx) = ClientChannel::pair(32);
        relay.run(channel).await;
        let writes = fx.store.content_writes(message_id).await;

        time::sleep(Duration::from_secs(30)).await;
        handle.cancel();
        handle.cancel();

        assert_eq!(fx.store.content_writes(message_id).await, writes);
        assert_eq!(writes, vec!["done"]);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_leaves_empty_placeholder() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::failing(ProviderError::RateLimited {
            retry_after: Some(7),
        }));

        let err = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::TooManyRequests(_, Some(7))));
        let messages = fx.store.list_messages(fx.chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.is_empty());
        assert!(fx.store.content_writes(messages[1].id).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn error_on_first_poll_is_returned_before_streaming() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![MockStep::Fail(
            ProviderError::RateLimited {
                retry_after: Some(5),
            },
        )]));

        let err = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::TooManyRequests(_, Some(5))));
        let messages = fx.store.list_messages(fx.chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.is_empty());
        assert!(fx.store.content_writes(messages[1].id).await.is_empty());

        let handles = provider.cancel_handles().await;
        assert_eq!(handles.len(), 1);
        assert!(handles[0].is_cancelled());
        assert_eq!(handles[0].requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_provider_times_out_before_streaming() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![MockStep::Hang]));
        let settings = RelaySettings {
            stream_timeout: Duration::from_secs(5),
            ..RelaySettings::default()
        };

        let err = coordinator(&fx, &provider, settings)
            .start(fx.user_id, request(&fx))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(provider.cancel_handles().await[0].is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_stream_completes_with_done_only() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_fragments(Vec::<String>::new()));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        let (channel, rx) = ClientChannel::pair(32);
        let report = relay.run(channel).await;

        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(report.content, "");
        assert_eq!(drain(rx).await, vec![Frame::Done]);
        assert!(fx.store.content_writes(message_id).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_send_keeps_the_appended_fragment() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_script(vec![
            MockStep::Fragment("Hel".into()),
            MockStep::Fragment("lo".into()),
            MockStep::Hang,
        ]));
        let relay = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .unwrap();
        let message_id = relay.message_id();

        // Capacity 1 and nothing read: "Hel" fills the buffer and the send of
        // "lo" blocks until the receiver goes away.
        let (channel, rx) = ClientChannel::pair(1);
        let task = tokio::spawn(relay.run(channel));
        time::sleep(Duration::from_millis(10)).await;
        drop(rx);
        let report = task.await.unwrap();

        assert_eq!(report.outcome, RelayOutcome::Interrupted);
        assert_eq!(report.content, "Hello");
        assert_eq!(fx.store.content_writes(message_id).await, vec!["Hello"]);

        let handles = provider.cancel_handles().await;
        assert_eq!(handles[0].requests(), 1);
    }

    #[tokio::test]
    async fn history_load_failure_abandons_placeholder() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_fragments(["never"]));
        fx.store.fail_next_list_messages(1).await;

        let err = coordinator(&fx, &provider, RelaySettings::default())
            .start(fx.user_id, request(&fx))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::DatabaseError(_)));
        let messages = fx.store.list_messages(fx.chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.is_empty());
        assert!(fx.store.content_writes(messages[1].id).await.is_empty());
        assert!(provider.requests().await.is_empty());
    }

    #[tokio::test]
    async fn validation_failures_have_no_side_effects() {
        let fx = fixture().await;
        let provider = Arc::new(MockProvider::with_fragments(["x"]));
        let coordinator = coordinator(&fx, &provider, RelaySettings::default());

        let mut deleted = Chat::new(fx.user_id);
        deleted.is_deleted = true;
        fx.store.insert_chat(deleted.clone()).await;

        let missing = StreamRequest {
            chat_id: Uuid::new_v4(),
            ..request(&fx)
        };
        let err = coordinator.start(fx.user_id, missing).await.err().unwrap();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = coordinator.start(Uuid::new_v4(), request(&fx)).await.err().unwrap();
        assert!(matches!(err, AppError::Forbidden(_)));

        let gone = StreamRequest {
            chat_id: deleted.id,
            ..request(&fx)
        };
        let err = coordinator.start(fx.user_id, gone).await.err().unwrap();
        assert!(matches!(err, AppError::Conflict(_)));

        let unknown_model = StreamRequest {
            model: "nope".into(),
            ..request(&fx)
        };
        let err = coordinator
            .start(fx.user_id, unknown_model)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(fx.store.list_messages(fx.chat.id).await.unwrap().len(), 1);
        assert!(fx.store.list_messages(deleted.id).await.unwrap().is_empty());
        assert!(provider.requests().await.is_empty());
    }

    #[test]
    fn history_skips_placeholder_and_empty_replies() {
        let chat_id = Uuid::new_v4();
        let model_id = Uuid::new_v4();
        let user = NewMessage::user(chat_id, model_id, "hi").into_message();
        let stale = NewMessage::assistant_placeholder(chat_id, model_id, None).into_message();
        let mut answered = NewMessage::assistant_placeholder(chat_id, model_id, None).into_message();
        answered.content = "hello".into();
        let current = NewMessage::assistant_placeholder(chat_id, model_id, None).into_message();

        let history = provider_history(
            &[user, stale, answered, current.clone()],
            Some(current.id),
        );

        assert_eq!(
            history,
            vec![
                ChatMessage::new(Role::User, "hi"),
                ChatMessage::new(Role::Assistant, "hello"),
            ]
        );
    }
}
