//! Subscriber session.
//!
//! One outbound connection to the relay, driven by a single actor task.
//! The actor owns the write half, the reconnect timer and the state; the
//! read half runs in its own task and reports back through an event
//! channel. Every connection attempt gets a new epoch, and events from an
//! older epoch are dropped, so a socket that was already replaced can never
//! schedule a second reconnect.

use crate::config::SubscriberConfig;
use crate::presenter::Presenter;
use crate::reconnect::ReconnectTimer;
use beacon_core::Notification;
use beacon_protocol::WireMessage;
use beacon_transport::{websocket, TransportError, WsReader, WsWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Notifications queued for the presenter before new ones are dropped.
pub const NOTIFICATION_BACKLOG: usize = 32;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket. A reconnect may be pending.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// Socket open and announced.
    Connected,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

enum Event {
    Dialed {
        epoch: u64,
        result: Result<(WsWriter, WsReader), TransportError>,
    },
    Ping {
        epoch: u64,
    },
    Closed {
        epoch: u64,
    },
    ReconnectDue {
        generation: u64,
    },
}

/// Handle to a running subscriber session.
pub struct Session {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Session {
    /// Start a session. The first connection attempt begins immediately.
    #[must_use]
    pub fn spawn(config: SubscriberConfig, presenter: Arc<dyn Presenter>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(NOTIFICATION_BACKLOG);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        let dispatcher = tokio::spawn(dispatch(presenter, dispatch_rx));

        let actor = Actor {
            config,
            state: state_tx,
            events: events_tx,
            dispatch: dispatch_tx,
            epoch: 0,
            writer: None,
            reader: None,
            dial: None,
            reconnect: ReconnectTimer::new(),
        };
        let task = tokio::spawn(actor.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            state: state_rx,
            task,
            dispatcher,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Connect now if disconnected, cancelling any pending reconnect.
    pub async fn reconnect(&self) {
        self.command(Command::Connect).await;
    }

    /// Close the socket. The usual close handling applies, so a reconnect is
    /// scheduled.
    pub async fn disconnect(&self) {
        self.command(Command::Disconnect).await;
    }

    /// Close the socket, cancel any pending reconnect and stop the session.
    pub async fn shutdown(self) {
        self.command(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Session task ended abnormally");
        }
        self.dispatcher.abort();
    }

    async fn command(&self, command: Command) {
        if let Err(e) = self.commands.send(command).await {
            debug!(command = ?e.0, "Session already stopped");
        }
    }
}

/// Hand notifications to the presenter one at a time, off the read loop.
async fn dispatch(presenter: Arc<dyn Presenter>, mut notifications: mpsc::Receiver<Notification>) {
    while let Some(notification) = notifications.recv().await {
        presenter.on_notification(notification).await;
    }
}

struct Actor {
    config: SubscriberConfig,
    state: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<Event>,
    dispatch: mpsc::Sender<Notification>,
    epoch: u64,
    writer: Option<WsWriter>,
    reader: Option<JoinHandle<()>>,
    dial: Option<JoinHandle<()>>,
    reconnect: ReconnectTimer,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.connect();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.on_connect_requested(),
                    Some(Command::Disconnect) => self.on_disconnect_requested().await,
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = events.recv() => self.on_event(event).await,
            }
        }

        self.stop().await;
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Session state changed");
        }
    }

    fn connect(&mut self) {
        self.reconnect.cancel();
        self.epoch += 1;
        self.set_state(SessionState::Connecting);

        let epoch = self.epoch;
        let url = self.config.server_url.clone();
        let timeout = self.config.connect_timeout();
        let events = self.events.clone();

        info!(url = %url, "Connecting");
        self.dial = Some(tokio::spawn(async move {
            let result = websocket::connect(&url, timeout).await;
            let _ = events.send(Event::Dialed { epoch, result });
        }));
    }

    fn on_connect_requested(&mut self) {
        match self.current() {
            SessionState::Disconnected => self.connect(),
            state => debug!(state = ?state, "Connect ignored"),
        }
    }

    async fn on_disconnect_requested(&mut self) {
        match self.current() {
            SessionState::Disconnected => debug!("Disconnect ignored, no socket"),
            _ => {
                info!("Disconnecting");
                self.close().await;
            }
        }
    }

    async fn on_event(&mut self, event: Event) {
        match event {
            Event::Dialed { epoch, result } if epoch == self.epoch => {
                self.dial = None;
                self.on_dialed(result).await;
            }
            Event::Ping { epoch } if epoch == self.epoch => self.on_ping().await,
            Event::Closed { epoch } if epoch == self.epoch => self.close().await,
            Event::ReconnectDue { generation } => {
                if self.reconnect.acknowledge(generation)
                    && self.current() == SessionState::Disconnected
                {
                    self.connect();
                }
            }
            Event::Dialed { .. } | Event::Ping { .. } | Event::Closed { .. } => {
                trace!("Dropping event from a replaced connection");
            }
        }
    }

    async fn on_dialed(&mut self, result: Result<(WsWriter, WsReader), TransportError>) {
        let (mut writer, reader) = match result {
            Ok(halves) => halves,
            Err(e) => {
                warn!(error = %e, "Connection failed");
                self.set_state(SessionState::Disconnected);
                self.schedule_reconnect();
                return;
            }
        };

        if let Some(identity) = self.config.identity() {
            if let Err(e) = writer.send(&WireMessage::auth(identity)).await {
                warn!(error = %e, "Failed to announce identity");
                self.writer = Some(writer);
                self.close().await;
                return;
            }
            debug!(identity = %identity, "Identity announced");
        }

        info!(url = %self.config.server_url, "Connected");
        self.writer = Some(writer);
        self.reader = Some(tokio::spawn(read_loop(
            reader,
            self.epoch,
            self.events.clone(),
            self.dispatch.clone(),
            self.config.default_duration(),
        )));
        self.set_state(SessionState::Connected);
    }

    async fn on_ping(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.send(&WireMessage::Pong).await {
            warn!(error = %e, "Failed to answer ping");
            self.close().await;
        }
    }

    /// Tear down the current socket, if any, and schedule one reconnect.
    async fn close(&mut self) {
        self.release().await;
        self.set_state(SessionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Drop every resource tied to the current epoch.
    async fn release(&mut self) {
        // Invalidate events already in flight for this socket.
        self.epoch += 1;

        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay();
        let events = self.events.clone();
        self.reconnect.schedule(delay, move |generation| {
            let _ = events.send(Event::ReconnectDue { generation });
        });
        info!(delay = ?delay, "Reconnect scheduled");
    }

    async fn stop(&mut self) {
        self.reconnect.cancel();
        self.release().await;
        self.set_state(SessionState::Disconnected);
        info!("Session stopped");
    }
}

async fn read_loop(
    mut reader: WsReader,
    epoch: u64,
    events: mpsc::UnboundedSender<Event>,
    dispatch: mpsc::Sender<Notification>,
    default_duration: Duration,
) {
    loop {
        match reader.recv().await {
            Ok(Some(WireMessage::Notification { data })) => {
                match Notification::from_wire(&data, default_duration) {
                    Ok(notification) => match dispatch.try_send(notification) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => {
                            warn!(sender = %dropped.sender(), "Presenter backlog full, dropping notification");
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!("Presenter stopped, dropping notification");
                        }
                    },
                    Err(e) => warn!(sender = %data.sender, error = %e, "Dropping notification"),
                }
            }
            Ok(Some(WireMessage::Ping)) => {
                if events.send(Event::Ping { epoch }).is_err() {
                    break;
                }
            }
            Ok(Some(WireMessage::Connected { client_id, .. })) => {
                info!(client_id = %client_id, "Registered with relay");
            }
            Ok(Some(WireMessage::ServerShutdown { message })) => {
                info!(message = %message, "Server is shutting down");
            }
            Ok(Some(other)) => {
                debug!(kind = other.kind(), "Ignoring message");
            }
            Ok(None) => {
                info!("Disconnected from server");
                break;
            }
            Err(TransportError::Protocol(e)) => {
                warn!(error = %e, "Dropping malformed frame");
            }
            Err(e) => {
                warn!(error = %e, "Connection error");
                break;
            }
        }
    }

    let _ = events.send(Event::Closed { epoch });
}
