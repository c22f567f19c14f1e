//! Driver task owning the device link
//!
//! One driver task per client owns the [`Lifecycle`] state machine and serializes
//! everything that touches it: user commands, transport events, heartbeat ticks and the
//! reconnect, send-retry, close-grace and metrics timers. Each socket gets its own short-lived task that
//! owns both socket halves and forwards traffic tagged with the socket's generation.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ConsoleError;
use crate::channel::SharedChannels;
use crate::config::ClientConfig;
use crate::connection::lifecycle::{CloseOutcome, ConnectionState, Lifecycle, ReconnectPolicy};
use crate::connection::router::{Routed, route_text};
use crate::demux::{Delivery, Demuxer};
use crate::events::{ClientEvent, EventSender};
use crate::transport::{Connector, WireMessage};
use crate::types::{AlgorithmResult, ControlMessage, RequestKind};

/// Requests from the client handle
#[derive(Debug)]
pub(crate) enum Command {
    Connect(String),
    Send(ControlMessage),
    Close,
}

/// Reports from socket tasks, tagged with the socket generation
#[derive(Debug)]
enum TransportEvent {
    Connected { generation: u64 },
    ConnectFailed { generation: u64, error: ConsoleError },
    Message { generation: u64, message: WireMessage },
    Closed { generation: u64, error: Option<ConsoleError> },
}

/// Handles returned to the client when the driver is spawned
pub(crate) struct DriverHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<ConnectionState>,
}

/// Live socket as seen by the driver
struct SocketHandle {
    outbound: mpsc::UnboundedSender<WireMessage>,
    cancel: CancellationToken,
}

enum Step {
    Shutdown,
    Command(Command),
    Transport(TransportEvent),
    Heartbeat,
    Reconnect,
    SendRetry,
    CloseGrace,
    Metrics,
}

pub(crate) struct Driver {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    lifecycle: Lifecycle,
    url: Option<String>,
    socket: Option<SocketHandle>,
    pending: VecDeque<ControlMessage>,
    heartbeat: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    send_retry: Option<Pin<Box<Sleep>>>,
    /// Armed once the device announces its disconnect
    close_grace: Option<Pin<Box<Sleep>>>,
    metrics: Interval,
    last_inbound: Instant,
    channels: SharedChannels,
    demuxer: Demuxer,
    events: EventSender,
    state: watch::Sender<ConnectionState>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl Driver {
    /// Spawn the driver task
    ///
    /// The task runs until `cancel` fires or every command sender is dropped.
    pub(crate) fn spawn(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        channels: SharedChannels,
        events: EventSender,
        cancel: CancellationToken,
    ) -> DriverHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let metrics_period = config.metrics.interval();
        let mut metrics = interval_at(Instant::now() + metrics_period, metrics_period);
        metrics.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = Driver {
            lifecycle: Lifecycle::new(ReconnectPolicy::from_config(&config.connection)),
            demuxer: Demuxer::new(&config.demux),
            config,
            connector,
            url: None,
            socket: None,
            pending: VecDeque::new(),
            heartbeat: None,
            reconnect: None,
            send_retry: None,
            close_grace: None,
            metrics,
            last_inbound: Instant::now(),
            channels,
            events,
            state: state_tx,
            transport_tx,
            cancel,
        };

        tokio::spawn(driver.run(command_rx, transport_rx));

        DriverHandle { commands: command_tx, state: state_rx }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!("Connection driver started");

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Shutdown,
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Shutdown,
                },
                Some(event) = transport.recv() => Step::Transport(event),
                _ = tick(&mut self.heartbeat) => Step::Heartbeat,
                _ = fire(&mut self.reconnect) => Step::Reconnect,
                _ = fire(&mut self.send_retry) => Step::SendRetry,
                _ = fire(&mut self.close_grace) => Step::CloseGrace,
                _ = self.metrics.tick() => Step::Metrics,
            };

            match step {
                Step::Shutdown => break,
                Step::Command(command) => self.handle_command(command),
                Step::Transport(event) => self.handle_transport(event),
                Step::Heartbeat => self.on_heartbeat(),
                Step::Reconnect => {
                    self.reconnect = None;
                    self.on_reconnect();
                }
                Step::SendRetry => {
                    self.send_retry = None;
                    self.on_send_retry();
                }
                Step::CloseGrace => {
                    self.close_grace = None;
                    self.on_close_grace();
                }
                Step::Metrics => self.on_metrics(),
            }
        }

        self.release_socket();
        self.channels.lock().deactivate_all();
        info!("Connection driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(url) => self.connect(url),
            Command::Send(message) => self.send(message),
            Command::Close => self.close(),
        }
    }

    fn connect(&mut self, url: String) {
        if self.lifecycle.state() != ConnectionState::Disconnected {
            debug!("Connect ignored, link is {:?}", self.lifecycle.state());
            return;
        }
        self.reconnect = None;
        self.url = Some(url);
        self.open_socket();
    }

    fn on_reconnect(&mut self) {
        debug!(
            "Reconnect attempt {}/{}",
            self.lifecycle.attempts(),
            self.lifecycle.policy().max_attempts
        );
        self.open_socket();
    }

    fn open_socket(&mut self) {
        let Some(url) = self.url.clone() else {
            warn!("No device url to connect to");
            return;
        };
        let Some(generation) = self.lifecycle.begin_connect() else {
            return;
        };
        self.publish_state();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.child_token();
        self.socket = Some(SocketHandle { outbound: outbound_tx, cancel: cancel.clone() });

        debug!("Opening socket generation {} to {}", generation, url);
        tokio::spawn(run_socket(
            self.connector.clone(),
            url,
            generation,
            outbound_rx,
            self.transport_tx.clone(),
            cancel,
        ));
    }

    fn send(&mut self, message: ControlMessage) {
        if self.lifecycle.state() == ConnectionState::Open {
            self.write(&message);
            return;
        }
        if self.lifecycle.is_terminated() {
            warn!("Link is closed, dropping message of kind {}", message.kind);
            return;
        }

        if self.pending.len() >= self.config.connection.max_pending_sends {
            if let Some(dropped) = self.pending.pop_front() {
                warn!("Pending send queue full, dropping message of kind {}", dropped.kind);
            }
        }
        trace!("Socket not open, holding message of kind {}", message.kind);
        self.pending.push_back(message);
        self.arm_send_retry();
    }

    fn arm_send_retry(&mut self) {
        if self.send_retry.is_none() {
            self.send_retry = Some(Box::pin(sleep(self.config.connection.send_retry_delay())));
        }
    }

    fn on_send_retry(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if self.lifecycle.state() != ConnectionState::Open {
            // parked until the next open when no attempt is running or scheduled
            if self.lifecycle.state() != ConnectionState::Disconnected || self.reconnect.is_some() {
                self.arm_send_retry();
            }
            return;
        }

        debug!("Flushing {} held messages", self.pending.len());
        while let Some(message) = self.pending.pop_front() {
            self.write(&message);
        }
    }

    fn write(&mut self, message: &ControlMessage) {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message of kind {}: {}", message.kind, e);
                return;
            }
        };
        self.write_wire(WireMessage::Text(text));
    }

    fn write_wire(&mut self, message: WireMessage) {
        let Some(socket) = &self.socket else {
            return;
        };
        // a closed channel means the socket task already ended; its close report follows
        if socket.outbound.send(message).is_err() {
            debug!("Socket writer gone, dropping outbound message");
        }
    }

    fn close(&mut self) {
        info!("Closing device link");
        let release = self.lifecycle.user_close();
        self.reconnect = None;
        self.drop_pending();

        if release {
            self.write_wire(WireMessage::Close);
            let generation = self.lifecycle.generation();
            self.handle_closed(generation, None);
        }
    }

    fn drop_pending(&mut self) {
        if !self.pending.is_empty() {
            warn!("Link abandoned, dropping {} held messages", self.pending.len());
            self.pending.clear();
        }
        self.send_retry = None;
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { generation } => {
                if !self.lifecycle.opened(generation) {
                    trace!("Ignoring open of stale socket generation {}", generation);
                    return;
                }
                info!("Device link open");
                self.last_inbound = Instant::now();
                let period = self.config.connection.heartbeat_interval();
                let mut heartbeat = interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
                self.publish_state();
                self.events.emit(ClientEvent::Opened);
                if !self.pending.is_empty() {
                    self.arm_send_retry();
                }
            }
            TransportEvent::ConnectFailed { generation, error } => {
                self.handle_closed(generation, Some(error));
            }
            TransportEvent::Message { generation, message } => {
                if !self.lifecycle.is_current(generation) {
                    trace!("Ignoring message from stale socket generation {}", generation);
                    return;
                }
                self.last_inbound = Instant::now();
                match message {
                    WireMessage::Text(text) => self.on_text(&text),
                    WireMessage::Binary(data) => self.on_binary(data),
                    WireMessage::Close => {}
                }
            }
            TransportEvent::Closed { generation, error } => {
                self.handle_closed(generation, error);
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        let routed = match route_text(text) {
            Ok(routed) => routed,
            Err(e) => {
                warn!("Dropping malformed message: {}", e);
                return;
            }
        };

        match routed {
            Routed::ServerClosing => {
                if self.lifecycle.server_closing() {
                    info!("Device announced disconnect");
                    self.heartbeat = None;
                    self.close_grace =
                        Some(Box::pin(sleep(self.config.connection.close_grace())));
                    self.publish_state();
                }
            }
            Routed::Superseded => {
                warn!("Session taken over by another client, automatic reconnect disabled");
                self.lifecycle.superseded();
                self.events.emit(ClientEvent::Superseded);
            }
            Routed::Application(message) => {
                debug!("Dispatching message of kind {:?}", message.kind());
                if message.request_kind() == Some(RequestKind::AlgorithmResult) {
                    match AlgorithmResult::from_message(&message) {
                        Ok(result) => {
                            if let Err(e) = self.channels.lock().push_result(result) {
                                debug!("Result not queued: {}", e);
                            }
                        }
                        Err(e) => warn!("Dropping malformed algorithm result: {}", e),
                    }
                }
                self.events.emit(ClientEvent::Message(message));
            }
        }
    }

    fn on_binary(&mut self, data: Bytes) {
        let delivery = self.demuxer.route(&mut self.channels.lock(), data);
        match delivery {
            Ok(Delivery::Delivered { channel, latched: true, .. }) => {
                debug!("First frame received on channel {}", channel);
            }
            Ok(_) => {}
            Err(e) => warn!("Dropping binary message: {}", e),
        }
    }

    fn on_heartbeat(&mut self) {
        if let Some(limit) = self.config.connection.idle_timeout() {
            if self.last_inbound.elapsed() >= limit {
                warn!("No inbound traffic for {:?}, treating socket as dead", limit);
                let generation = self.lifecycle.generation();
                self.handle_closed(generation, Some(ConsoleError::Timeout { duration: limit }));
                return;
            }
        }

        trace!("Sending heartbeat");
        self.write(&ControlMessage::heartbeat());
    }

    fn on_close_grace(&mut self) {
        if self.lifecycle.state() != ConnectionState::Closing {
            return;
        }
        let grace = self.config.connection.close_grace();
        warn!("Device did not close the socket within {:?} of its notice", grace);
        let generation = self.lifecycle.generation();
        self.handle_closed(
            generation,
            Some(ConsoleError::transport(format!(
                "socket still open {grace:?} after the device announced its disconnect"
            ))),
        );
    }

    fn on_metrics(&mut self) {
        let stats = self.channels.lock().take_stats();
        for stats in stats {
            trace!(
                "Channel {}: {} frames, {} results",
                stats.channel, stats.frames_played, stats.results_received
            );
            let channel = stats.channel;
            self.events.emit(ClientEvent::ChannelStats(stats));
            self.events.emit(ClientEvent::OverlayExpired { channel });
        }
    }

    fn handle_closed(&mut self, generation: u64, error: Option<ConsoleError>) {
        let was_open =
            matches!(self.lifecycle.state(), ConnectionState::Open | ConnectionState::Closing);

        let outcome = self.lifecycle.closed(generation);
        if outcome == CloseOutcome::Stale {
            trace!("Ignoring close of stale socket generation {}", generation);
            return;
        }

        self.release_socket();
        self.publish_state();
        self.channels.lock().deactivate_all();

        if was_open {
            match &error {
                Some(e) => warn!("Device link lost: {}", e),
                None => info!("Device link closed"),
            }
            self.events.emit(ClientEvent::Disconnected { error: error.map(|e| e.to_string()) });
        } else if let Some(e) = &error {
            warn!("Connection attempt failed: {}", e);
        }

        match outcome {
            CloseOutcome::Reconnect { attempt, delay } => {
                let max_attempts = self.lifecycle.policy().max_attempts;
                info!("Reconnecting in {:?} (attempt {}/{})", delay, attempt, max_attempts);
                self.reconnect = Some(Box::pin(sleep(delay)));
                self.events.emit(ClientEvent::Reconnecting { attempt, max_attempts });
            }
            CloseOutcome::LinkLost { attempts } => {
                error!("Device link lost after {} reconnect attempts", attempts);
                self.drop_pending();
                self.events.emit(ClientEvent::LinkLost { attempts });
            }
            CloseOutcome::Stopped(termination) => {
                debug!("Link stopped: {:?}", termination);
                self.drop_pending();
            }
            CloseOutcome::Idle => self.drop_pending(),
            CloseOutcome::Stale => {}
        }
    }

    fn release_socket(&mut self) {
        self.heartbeat = None;
        self.close_grace = None;
        if let Some(socket) = self.socket.take() {
            socket.cancel.cancel();
        }
    }

    fn publish_state(&self) {
        let state = self.lifecycle.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Connection state {:?} -> {:?}", current, state);
            *current = state;
            true
        });
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => future::pending().await,
    }
}

/// Socket task: connect, then pump both directions until either side goes away.
///
/// Outbound messages queued before cancellation are still written, so a close frame
/// queued just before the socket is released reaches the device.
async fn run_socket(
    connector: Arc<dyn Connector>,
    url: String,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<WireMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connector.connect(&url) => result,
    };

    let mut socket = match connected {
        Ok(socket) => socket,
        Err(error) => {
            let _ = events.send(TransportEvent::ConnectFailed { generation, error });
            return;
        }
    };
    if events.send(TransportEvent::Connected { generation }).is_err() {
        return;
    }

    let error = loop {
        tokio::select! {
            biased;

            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = socket.sink.close().await;
                    return;
                };
                let closing = message == WireMessage::Close;
                if let Err(e) = socket.sink.send(message).await {
                    break Some(e);
                }
                if closing {
                    return;
                }
            }
            inbound = socket.stream.next() => match inbound {
                Some(Ok(WireMessage::Close)) | None => break None,
                Some(Ok(message)) => {
                    if events.send(TransportEvent::Message { generation, message }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break Some(e),
            },
            _ = cancel.cancelled() => {
                let _ = socket.sink.close().await;
                return;
            }
        }
    };

    let _ = events.send(TransportEvent::Closed { generation, error });
}
