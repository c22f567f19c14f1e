//! Client handle for one device

use futures::Stream;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ConnectionState;
use crate::channel::{ChannelBinding, ChannelTable, SharedChannels};
use crate::config::{ClientConfig, validate_url};
use crate::driver::{Command, Driver};
use crate::events::{EventSender, EventStream};
use crate::sync::{PlaybackClock, RateController, frame_loop};
use crate::transport::Connector;
use crate::transports::WebSocketConnector;
use crate::types::{AlgorithmResult, ChannelId, ControlMessage, RequestKind};
use crate::{ConsoleError, Result};

/// Connection to one device plus the per-channel synchronization state.
///
/// Construct one per device. Everything the client observes is delivered on the
/// [`EventStream`] returned alongside it. Dropping the client stops the driver, the socket
/// and every frame loop.
pub struct TransportClient {
    config: Arc<ClientConfig>,

    /// Command queue of the driver task
    commands: mpsc::UnboundedSender<Command>,

    /// Link state published by the driver
    state: watch::Receiver<ConnectionState>,

    /// Channel table shared with the driver and frame loops
    channels: SharedChannels,

    events: EventSender,
    clock: PlaybackClock,

    /// Parent of every task the client spawns
    cancel: CancellationToken,
}

impl TransportClient {
    /// Create a client speaking websocket to the device.
    ///
    /// Must be called inside a tokio runtime. No connection is made until
    /// [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Result<(Self, EventStream)> {
        Self::with_connector(config, WebSocketConnector::new())
    }

    /// Create a client over a custom [`Connector`].
    pub fn with_connector<C: Connector>(
        config: ClientConfig,
        connector: C,
    ) -> Result<(Self, EventStream)> {
        config.validate()?;
        let config = Arc::new(config);

        let (events, stream) = EventSender::channel();
        let channels = ChannelTable::shared(config.alignment.clone());
        let cancel = CancellationToken::new();
        let clock = PlaybackClock::new(RateController::from_config(&config.playback));

        let driver = Driver::spawn(
            config.clone(),
            Arc::new(connector),
            channels.clone(),
            events.clone(),
            cancel.child_token(),
        );

        let client = Self {
            config,
            commands: driver.commands,
            state: driver.state,
            channels,
            events,
            clock,
            cancel,
        };
        Ok((client, stream))
    }

    /// Connect to `url`.
    ///
    /// No-op while a connection exists. After [`close`](Self::close), link loss or a
    /// superseded session, this is the explicit restart and resets the reconnect budget.
    pub fn connect(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        validate_url(&url)?;
        self.command(Command::Connect(url))
    }

    /// Connect to the url from the configuration.
    pub fn connect_configured(&self) -> Result<()> {
        match &self.config.connection.url {
            Some(url) => self.connect(url.clone()),
            None => Err(ConsoleError::config("no device url configured")),
        }
    }

    /// Send a control message, holding it until the socket is open.
    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.command(Command::Send(message))
    }

    /// Send `{kind, param}` for a known request kind.
    pub fn send_request(&self, kind: RequestKind, param: Option<Value>) -> Result<()> {
        self.send(ControlMessage::request(kind, param))
    }

    /// Close the link. Automatic reconnect stays off until the next `connect`.
    pub fn close(&self) -> Result<()> {
        self.command(Command::Close)
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Link state changes, starting with the current state
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Start streams on the given channels.
    ///
    /// Each channel gets fresh state (an active channel is restarted) and its own frame
    /// loop, then START_STREAM is sent with the channel count.
    pub fn start_stream(&self, bindings: Vec<ChannelBinding>) -> Result<()> {
        let count = bindings.len();
        let period = self.config.alignment.frame_interval();

        for binding in bindings {
            let channel = binding.channel;
            let frame_loop = self.cancel.child_token();
            self.channels.lock().activate(binding, frame_loop.clone());
            frame_loop::spawn(
                channel,
                self.channels.clone(),
                self.clock,
                self.events.clone(),
                period,
                frame_loop,
            );
        }

        info!("Starting streams on {} channels", count);
        self.send_request(RequestKind::StartStream, Some(Value::from(count)))
    }

    /// Stop streams on the given channels, then send STOP_STREAM.
    ///
    /// Queues, epochs, sinks and frame loops are released before this returns.
    pub fn stop_stream(&self, channels: &[ChannelId]) -> Result<()> {
        {
            let mut table = self.channels.lock();
            for &channel in channels {
                if !table.deactivate(channel) {
                    debug!("Channel {} had no active stream", channel);
                }
            }
        }

        info!("Stopping streams on {} channels", channels.len());
        self.send_request(RequestKind::StopStream, Some(Value::from(channels.len())))
    }

    /// Queue a result directly, bypassing the socket.
    pub fn push_result(&self, result: AlgorithmResult) -> Result<()> {
        self.channels.lock().push_result(result)
    }

    /// Epoch latched for `channel` in its current stream session
    pub fn channel_epoch(&self, channel: ChannelId) -> Option<u64> {
        self.channels.lock().epoch(channel)
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.channels.lock().active_channels()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop every task. The client is unusable afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ConsoleError::Closed);
        }
        self.commands.send(command).map_err(|_| ConsoleError::Closed)
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        debug!("Dropping transport client");
        self.cancel.cancel();
    }
}
