//! Session client: the actor that owns the channel, and the handle the
//! presentation layer talks to.
//!
//! All work happens on one tokio task. Transport events and commands share
//! one queue and are handled in arrival order; timer firings come in on a
//! second one. The mirror never sees concurrent writers. [`ClientHandle`]
//! is cheap to clone; reads are lock-free through `ArcSwap`, writes go
//! through the queue.

use std::sync::Arc;

use arc_swap::ArcSwap;
use preauth_protocol::{ClientMessage, DownloadToken, Executable, SessionState};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};
use url::Url;

pub use crate::command::NotifyCallback;
use crate::command::{ActorInput, ClientCommand, Inbox};
use crate::config::{ClientConfig, Endpoints};
use crate::dispatcher::{DispatchCounts, DispatchStats, Dispatcher, MessageHandler};
use crate::mirror::{ClientEvent, MirrorStore, SessionMirror};
use crate::supervisor::{Effect, Input, Supervisor};
use crate::timer::{Scheduler, TimerHandle, TimerId, TokioScheduler};
use crate::transport::{
    ConnectionHandle, ConnectionState, EventSender, Transport, TransportEvent, TransportMessage,
};
use crate::ws::WsTransport;

const EVENT_CAPACITY: usize = 64;

/// Entry point for starting a client.
pub struct SessionClient;

impl SessionClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Start a client with the WebSocket transport and tokio timers.
    pub fn start(config: ClientConfig) -> ClientHandle {
        Self::builder(config).start()
    }
}

/// Configures and starts a client.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Box<dyn Transport>>,
    scheduler: Option<Box<dyn Scheduler>>,
    notify: Option<NotifyCallback>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            scheduler: None,
            notify: None,
        }
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn scheduler(mut self, scheduler: impl Scheduler) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    pub fn on_notify(mut self, callback: impl FnMut(DownloadToken) + Send + 'static) -> Self {
        self.notify = Some(Box::new(callback));
        self
    }

    /// Spawn the client task and begin connecting. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> ClientHandle {
        let ClientBuilder {
            config,
            transport,
            scheduler,
            notify,
        } = self;

        let transport = transport.unwrap_or_else(|| {
            Box::new(
                WsTransport::new(config.connect_timeout)
                    .with_session_cookie(config.session_cookie.clone()),
            )
        });
        let scheduler = scheduler.unwrap_or_else(|| Box::new(TokioScheduler));

        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);

        let mirror = MirrorStore::new(events_tx.clone());
        let dispatcher = Dispatcher::new();

        let handle = ClientHandle {
            inbox: inbox.clone(),
            _release: Arc::new(ReleaseGuard {
                inbox: inbox.clone(),
            }),
            mirror: mirror.reader(),
            connection: state_rx,
            events: events_tx.clone(),
            stats: dispatcher.stats(),
            endpoints: config.endpoints.clone(),
        };

        let actor = ClientActor {
            url: config.endpoints.channel().clone(),
            supervisor: Supervisor::new(config.reconnect_delay),
            transport,
            scheduler,
            connection: None,
            timer: None,
            next_timer_id: 0,
            dispatcher,
            mirror,
            notify,
            connection_state: state_tx,
            events: events_tx,
            transport_events: Arc::new(inbox),
            timer_tx,
        };

        info!(
            component = "client",
            event = "client.started",
            url = %actor.url,
            reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
            "Session client started"
        );

        tokio::spawn(actor.run(inbox_rx, timer_rx));
        handle
    }
}

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// Handle to a running client (cheap to clone). The client is disposed
/// when [`ClientHandle::dispose`] is called or every handle is dropped.
#[derive(Clone)]
pub struct ClientHandle {
    inbox: Inbox,
    _release: Arc<ReleaseGuard>,
    mirror: Arc<ArcSwap<SessionMirror>>,
    connection: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    stats: Arc<DispatchStats>,
    endpoints: Endpoints,
}

impl ClientHandle {
    /// Lock-free snapshot of the mirror.
    pub fn snapshot(&self) -> Arc<SessionMirror> {
        self.mirror.load_full()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn dispatch_counts(&self) -> DispatchCounts {
        self.stats.counts()
    }

    pub fn is_disposed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Ask the server to revoke `token`. The mirror is not touched; the
    /// server answers with a fresh `state`. A no-op unless connected.
    pub fn request_deletion(&self, token: DownloadToken) {
        self.try_command(ClientCommand::RequestDeletion { token });
    }

    /// Register the callback run once per `notify` frame, replacing any
    /// previous one.
    pub fn set_notify_handler(&self, callback: impl FnMut(DownloadToken) + Send + 'static) {
        self.try_command(ClientCommand::SetNotifyHandler {
            callback: Some(Box::new(callback)),
        });
    }

    pub fn clear_notify_handler(&self) {
        self.try_command(ClientCommand::SetNotifyHandler { callback: None });
    }

    /// Wait until the mirror satisfies `predicate`. Returns `None` if the
    /// client is disposed first.
    pub async fn wait_for_mirror<F>(&self, mut predicate: F) -> Option<Arc<SessionMirror>>
    where
        F: FnMut(&SessionMirror) -> bool,
    {
        let mut events = self.subscribe();
        loop {
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return Some(snapshot);
            }
            tokio::select! {
                received = events.recv() => match received {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = self.inbox.closed() => return None,
            }
        }
    }

    /// Close the channel, cancel any pending reconnect and stop the client.
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .inbox
            .send(ActorInput::Command(ClientCommand::Dispose { reply }))
            .is_err()
        {
            return;
        }
        let _ = done.await;
    }

    /// Queue a command behind everything already received. The queue is
    /// unbounded, so a command is only lost once the client is disposed.
    fn try_command(&self, command: ClientCommand) {
        if let Err(mpsc::error::SendError(input)) = self.inbox.send(ActorInput::Command(command)) {
            debug!(
                component = "client",
                event = "client.command.disposed",
                input = ?input,
                "Client disposed, command ignored"
            );
        }
    }
}

/// Shared by every clone of a [`ClientHandle`]; tells the actor when the
/// last one goes away.
struct ReleaseGuard {
    inbox: Inbox,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let _ = self.inbox.send(ActorInput::Released);
    }
}

// ---------------------------------------------------------------------------
// ClientActor
// ---------------------------------------------------------------------------

struct ClientActor {
    url: Url,
    supervisor: Supervisor,
    transport: Box<dyn Transport>,
    scheduler: Box<dyn Scheduler>,
    /// The one live connection, if any.
    connection: Option<ConnectionHandle>,
    timer: Option<(TimerId, TimerHandle)>,
    next_timer_id: TimerId,
    dispatcher: Dispatcher,
    mirror: MirrorStore,
    notify: Option<NotifyCallback>,
    connection_state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    /// Handed to every connection; feeds the actor's own queue.
    transport_events: EventSender,
    timer_tx: mpsc::UnboundedSender<TimerId>,
}

impl ClientActor {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<ActorInput>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerId>,
    ) {
        self.apply(Input::Start);

        loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(ActorInput::Transport(message)) => self.on_transport(message),
                    Some(ActorInput::Command(ClientCommand::Dispose { reply })) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(ActorInput::Command(command)) => self.on_command(command),
                    Some(ActorInput::Released) | None => {
                        self.teardown();
                        break;
                    }
                },
                Some(id) = timer_rx.recv() => self.on_timer(id),
            }
        }

        info!(
            component = "client",
            event = "client.disposed",
            generation = self.supervisor.generation(),
            "Session client disposed"
        );
    }

    fn apply(&mut self, input: Input) {
        for effect in self.supervisor.handle(input) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Open(generation) => {
                if let Some(previous) = self.connection.take() {
                    previous.close();
                }
                debug!(
                    component = "client",
                    event = "client.connect",
                    generation,
                    url = %self.url,
                    "Opening connection"
                );
                let handle = self
                    .transport
                    .open(&self.url, generation, Arc::clone(&self.transport_events));
                self.connection = Some(handle);
                self.set_connection_state(ConnectionState::Connecting);
            }
            Effect::ScheduleReconnect(delay) => {
                self.next_timer_id += 1;
                let id = self.next_timer_id;
                let handle = self.scheduler.schedule(delay, id, self.timer_tx.clone());
                if let Some((_, stale)) = self.timer.replace((id, handle)) {
                    stale.cancel();
                }
                info!(
                    component = "client",
                    event = "client.reconnect.scheduled",
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
            }
            Effect::CancelTimer => {
                if let Some((_, timer)) = self.timer.take() {
                    timer.cancel();
                }
            }
            Effect::CloseConnection => {
                if let Some(connection) = self.connection.take() {
                    connection.close();
                    self.set_connection_state(ConnectionState::Closing);
                }
            }
            Effect::ResetMirror => {
                if self.mirror.reset() {
                    debug!(
                        component = "client",
                        event = "client.mirror.reset",
                        "Mirror reset to unknown"
                    );
                }
            }
        }
    }

    fn on_transport(&mut self, message: TransportMessage) {
        let TransportMessage { generation, event } = message;

        if !self.supervisor.is_current(generation) {
            match event {
                TransportEvent::Frame(_) => self
                    .dispatcher
                    .reject_stale(generation, self.supervisor.generation()),
                other => trace!(
                    component = "client",
                    event = "client.transport.stale",
                    generation,
                    current = self.supervisor.generation(),
                    transport_event = ?other,
                    "Ignoring event from superseded connection"
                ),
            }
            return;
        }

        match event {
            TransportEvent::Opened => {
                info!(
                    component = "client",
                    event = "client.connected",
                    generation,
                    "Connected"
                );
                self.set_connection_state(ConnectionState::Open);
                self.apply(Input::Opened(generation));
            }
            TransportEvent::Frame(text) => {
                let mut sink = MirrorSink {
                    mirror: &mut self.mirror,
                    notify: &mut self.notify,
                    events: &self.events,
                };
                self.dispatcher.route(generation, &text, &mut sink);
            }
            TransportEvent::Closed { reason } => {
                info!(
                    component = "client",
                    event = "client.disconnected",
                    generation,
                    reason = reason.as_deref().unwrap_or(""),
                    "Disconnected"
                );
                self.connection = None;
                self.set_connection_state(ConnectionState::Closed);
                self.apply(Input::Closed(generation));
            }
        }
    }

    fn on_timer(&mut self, id: TimerId) {
        match self.timer.as_ref() {
            Some((pending, _)) if *pending == id => {
                self.timer = None;
                self.apply(Input::TimerFired);
            }
            _ => trace!(
                component = "client",
                event = "client.timer.stale",
                timer_id = id,
                "Ignoring cancelled timer"
            ),
        }
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::RequestDeletion { token } => self.request_deletion(token),
            ClientCommand::SetNotifyHandler { callback } => self.notify = callback,
            // Handled by the run loop.
            ClientCommand::Dispose { .. } => {}
        }
    }

    fn request_deletion(&mut self, token: DownloadToken) {
        let Some(connection) = self.connection.as_ref() else {
            warn!(
                component = "client",
                event = "client.delete.not_connected",
                token,
                "No connection, deletion request dropped"
            );
            return;
        };

        let state = connection.state();
        if !state.is_open() {
            warn!(
                component = "client",
                event = "client.delete.not_open",
                token,
                state = %state,
                "Connection not open, deletion request dropped"
            );
            return;
        }

        let frame = match serde_json::to_string(&ClientMessage::DeleteDownloadToken { token }) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    component = "client",
                    event = "client.delete.serialize_failed",
                    token,
                    error = %e,
                    "Failed to serialize deletion request"
                );
                return;
            }
        };

        match connection.send(frame) {
            Ok(()) => info!(
                component = "client",
                event = "client.delete.sent",
                token,
                generation = connection.generation(),
                "Deletion requested"
            ),
            Err(e) => warn!(
                component = "client",
                event = "client.delete.send_failed",
                token,
                error = %e,
                "Deletion request dropped"
            ),
        }
    }

    fn teardown(&mut self) {
        self.apply(Input::Dispose);
        self.set_connection_state(ConnectionState::Closed);
    }

    fn set_connection_state(&self, next: ConnectionState) {
        let changed = self.connection_state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            let _ = self.events.send(ClientEvent::ConnectionChanged(next));
        }
    }
}

/// Applies dispatched messages to the mirror on behalf of the actor.
struct MirrorSink<'a> {
    mirror: &'a mut MirrorStore,
    notify: &'a mut Option<NotifyCallback>,
    events: &'a broadcast::Sender<ClientEvent>,
}

impl MessageHandler for MirrorSink<'_> {
    fn on_state(&mut self, session: SessionState) {
        self.mirror.apply_state(session);
    }

    fn on_executables(&mut self, build_log: Option<String>, executables: Vec<Executable>) {
        self.mirror.apply_executables(build_log, executables);
    }

    fn on_notify(&mut self, token: DownloadToken) {
        if let Some(callback) = self.notify.as_mut() {
            callback(token);
        }
        let _ = self.events.send(ClientEvent::Notified { token });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use preauth_protocol::Platform;

    use super::*;
    use crate::testing::{settle, CountingScheduler, MockTransport};
    use crate::transport::{ConnectionLink, Outbound};

    const STATE_42: &str = r#"{"type":"state","session":{"id":42,"downloads":[{"token":7,"filename":"demo.exe","last_used":"2024-11-02T10:00:00Z","download_time":"2024-11-02T09:00:00Z"}]}}"#;
    const LINUX_CATALOG: &str = r#"{"type":"executables","build_log":"/build-logs","executables":[{"id":"linux","filename":"app","size":1024}]}"#;

    struct Harness {
        client: ClientHandle,
        transport: MockTransport,
        scheduler: CountingScheduler,
    }

    fn start() -> Harness {
        start_with(|builder| builder)
    }

    fn start_with(configure: impl FnOnce(ClientBuilder) -> ClientBuilder) -> Harness {
        let transport = MockTransport::new();
        let scheduler = CountingScheduler::new();
        let config = ClientConfig::new("http://localhost:5800/").unwrap();
        let builder = SessionClient::builder(config)
            .transport(transport.clone())
            .scheduler(scheduler.clone());
        let client = configure(builder).start();
        Harness {
            client,
            transport,
            scheduler,
        }
    }

    fn frame(link: &ConnectionLink, text: &str) {
        link.frame(text);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_to_channel_url_on_start() {
        let h = start();
        settle().await;

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(
            h.transport.last_url().unwrap().as_str(),
            "ws://localhost:5800/ws"
        );
        assert_eq!(h.client.connection_state(), ConnectionState::Connecting);
        assert!(h.client.snapshot().is_unknown());
    }

    #[tokio::test(start_paused = true)]
    async fn mirrors_state_and_executables() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        frame(&link, STATE_42);
        frame(&link, LINUX_CATALOG);
        settle().await;

        let snap = h.client.snapshot();
        assert_eq!(snap.session_id(), Some(42));
        assert!(snap.has_download(7));
        let executables = snap.executables().unwrap();
        assert_eq!(executables.len(), 1);
        assert_eq!(executables[0].platform(), Platform::Linux);
        assert_eq!(executables[0].filename, "app");
        assert_eq!(executables[0].size, 1024);
        assert_eq!(snap.build_log(), Some("/build-logs"));
        assert_eq!(h.client.connection_state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_resets_mirror_and_reconnects_after_delay() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        frame(&link, STATE_42);
        settle().await;
        assert_eq!(h.client.snapshot().session_id(), Some(42));

        drop(link);
        settle().await;
        assert!(h.client.snapshot().is_unknown());
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);
        assert_eq!(h.scheduler.scheduled(), 1);

        tokio::time::sleep(Duration::from_millis(2997)).await;
        assert_eq!(h.transport.open_count(), 1);

        tokio::time::sleep(Duration::from_millis(3)).await;
        assert_eq!(h.transport.open_count(), 2);
        assert_eq!(h.client.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_handshake_schedules_reconnect() {
        let h = start();
        settle().await;
        h.transport.link(1).closed(Some("refused".into()));
        settle().await;

        assert_eq!(h.scheduler.scheduled(), 1);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_close_schedules_one_reconnect() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        link.closed(None);
        h.transport.inject(
            1,
            TransportEvent::Closed {
                reason: Some("again".into()),
            },
        );
        settle().await;

        assert_eq!(h.scheduler.scheduled(), 1);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_runs_callback_once_and_leaves_mirror() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let h = start_with(move |builder| {
            builder.on_notify(move |token| sink.lock().unwrap().push(token))
        });
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        frame(&link, STATE_42);
        settle().await;
        let before = h.client.snapshot();

        frame(&link, r#"{"type":"notify","token":7}"#);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(*h.client.snapshot(), *before);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_handler_can_be_replaced_and_cleared() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.client
            .set_notify_handler(move |token| sink.lock().unwrap().push(token));
        settle().await;
        frame(&link, r#"{"type":"notify","token":1}"#);
        settle().await;

        h.client.clear_notify_handler();
        settle().await;
        frame(&link, r#"{"type":"notify","token":2}"#);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_counted_and_connection_stays_open() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        frame(&link, r#"{"foo":"bar"}"#);
        frame(&link, r#"{"type":"welcome"}"#);
        settle().await;

        let counts = h.client.dispatch_counts();
        assert_eq!(counts.malformed, 1);
        assert_eq!(counts.unknown, 1);
        assert_eq!(counts.applied, 0);
        assert!(h.client.snapshot().is_unknown());
        assert_eq!(h.client.connection_state(), ConnectionState::Open);
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_from_superseded_connection_are_ignored() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let h = start_with(move |builder| {
            builder.on_notify(move |token| sink.lock().unwrap().push(token))
        });
        settle().await;
        let first = h.transport.link(1);
        first.opened();
        drop(first);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        assert_eq!(h.transport.open_count(), 2);

        let second = h.transport.link(2);
        second.opened();
        frame(&second, LINUX_CATALOG);
        settle().await;
        let before = h.client.snapshot();

        h.transport
            .inject(1, TransportEvent::Frame(STATE_42.to_string()));
        h.transport.inject(
            1,
            TransportEvent::Frame(r#"{"type":"notify","token":7}"#.to_string()),
        );
        h.transport.inject(1, TransportEvent::Closed { reason: None });
        settle().await;

        assert_eq!(*h.client.snapshot(), *before);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(h.client.dispatch_counts().stale, 2);
        assert_eq!(h.client.connection_state(), ConnectionState::Open);
        assert_eq!(h.scheduler.scheduled(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_is_only_sent_on_open_connection() {
        let h = start();
        settle().await;
        let mut link = h.transport.link(1);

        h.client.request_deletion(7);
        settle().await;
        assert_eq!(link.try_next_outbound(), None);

        link.opened();
        settle().await;
        h.client.request_deletion(7);
        settle().await;

        assert_eq!(
            link.try_next_outbound(),
            Some(Outbound::Text(
                r#"{"type":"delete-download-token","token":7}"#.to_string()
            ))
        );
        // The mirror waits for the server's answer.
        assert!(h.client.snapshot().is_unknown());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_while_disconnected_is_dropped() {
        let h = start();
        settle().await;
        let mut first = h.transport.link(1);
        first.opened();
        settle().await;
        h.transport.inject(1, TransportEvent::Closed { reason: None });
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);

        h.client.request_deletion(7);
        settle().await;
        assert_eq!(first.try_next_outbound(), None);

        // Not queued for the next connection either.
        tokio::time::sleep(Duration::from_millis(3000)).await;
        settle().await;
        let mut second = h.transport.link(2);
        second.opened();
        settle().await;
        assert_eq!(second.try_next_outbound(), None);
        assert!(!h.client.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_requested_before_close_is_sent() {
        let h = start();
        settle().await;
        let mut link = h.transport.link(1);
        link.opened();
        settle().await;
        assert_eq!(h.client.connection_state(), ConnectionState::Open);

        h.client.request_deletion(7);
        h.transport.inject(1, TransportEvent::Closed { reason: None });
        settle().await;

        assert_eq!(
            link.try_next_outbound(),
            Some(Outbound::Text(
                r#"{"type":"delete-download-token","token":7}"#.to_string()
            ))
        );
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_registered_before_frame_sees_it() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        settle().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.client
            .set_notify_handler(move |token| sink.lock().unwrap().push(token));
        frame(&link, r#"{"type":"notify","token":7}"#);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_survives_a_command_backlog() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        settle().await;

        for token in 0..200 {
            h.client.request_deletion(token);
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        h.client
            .set_notify_handler(move |token| sink.lock().unwrap().push(token));
        frame(&link, r#"{"type":"notify","token":7}"#);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_while_connecting_abandons_attempt() {
        let h = start();
        settle().await;
        let mut link = h.transport.link(1);
        assert_eq!(h.client.connection_state(), ConnectionState::Connecting);

        h.client.dispose().await;
        assert_eq!(link.try_next_outbound(), Some(Outbound::Close));
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);

        // The handshake completing late neither opens nor reconnects.
        link.opened();
        assert_eq!(link.state(), ConnectionState::Closing);
        frame(&link, STATE_42);
        drop(link);
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.scheduler.scheduled(), 0);
        assert!(h.client.snapshot().is_unknown());
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_closes_open_connection() {
        let h = start();
        settle().await;
        let mut link = h.transport.link(1);
        link.opened();
        frame(&link, STATE_42);
        settle().await;

        h.client.dispose().await;

        assert_eq!(link.try_next_outbound(), Some(Outbound::Close));
        assert!(h.client.is_disposed());
        assert!(h.client.snapshot().is_unknown());
        assert_eq!(h.client.connection_state(), ConnectionState::Closed);

        // Second dispose is a no-op.
        h.client.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_pending_reconnect() {
        let h = start();
        settle().await;
        drop(h.transport.link(1));
        settle().await;
        assert_eq!(h.scheduler.scheduled(), 1);

        h.client.dispose().await;
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_handle_disposes() {
        let Harness {
            client, transport, ..
        } = start();
        let second = client.clone();
        settle().await;
        let mut link = transport.link(1);
        link.opened();
        settle().await;

        drop(client);
        settle().await;
        assert_eq!(link.try_next_outbound(), None);

        drop(second);
        settle().await;
        assert_eq!(link.try_next_outbound(), Some(Outbound::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_connection_and_mirror_changes() {
        let h = start();
        let mut events = h.client.subscribe();
        settle().await;
        let link = h.transport.link(1);
        link.opened();
        frame(&link, STATE_42);
        frame(&link, r#"{"type":"notify","token":9}"#);
        settle().await;

        let received: Vec<ClientEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(matches!(
            received[0],
            ClientEvent::ConnectionChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            received[1],
            ClientEvent::ConnectionChanged(ConnectionState::Open)
        ));
        assert!(matches!(&received[2], ClientEvent::MirrorChanged(snap) if snap.session_id() == Some(42)));
        assert!(matches!(received[3], ClientEvent::Notified { token: 9 }));
        assert_eq!(received.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_mirror_resolves_on_matching_snapshot() {
        let h = start();
        settle().await;
        let link = h.transport.link(1);
        link.opened();

        let client = h.client.clone();
        let waiter =
            tokio::spawn(async move { client.wait_for_mirror(|m| m.session_id().is_some()).await });
        settle().await;
        frame(&link, STATE_42);

        let snap = waiter.await.unwrap().expect("mirror populated");
        assert_eq!(snap.session_id(), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_mirror_ends_on_dispose() {
        let h = start();
        settle().await;

        let client = h.client.clone();
        let waiter =
            tokio::spawn(async move { client.wait_for_mirror(|m| m.session_id().is_some()).await });
        settle().await;
        h.client.dispose().await;

        assert!(waiter.await.unwrap().is_none());
    }
}
