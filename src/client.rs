//! Chat server connection handling.
//!
//! [`Client::connect`] opens the TCP connection, performs the login and
//! capability handshake, and spawns the reader and writer tasks. The writer
//! drains the send queue one line at a time with a fixed delay between
//! lines; the reader decodes inbound lines and forwards application events
//! to the [`Connection`]'s channel. PING and the welcome numeric are
//! handled internally and never reach the application.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use tmi_proto::{
    Capability, EventCodec, InboundEvent, LineCodec, Message, OutboundEvent, ProtocolEvent,
};

use crate::config::Config;
use crate::error::Result;
use crate::queue::{Receipt, SendQueue};
use crate::sender::Sender;
use crate::signal::{signal, Signal, SignalHandle};

/// Reads that stall longer than this kill the connection. The server pings
/// every few minutes, so a silent wire means a dead one.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// A live connection's observer side.
pub struct Connection {
    /// Decoded application events, in wire order.
    pub events: mpsc::Receiver<InboundEvent>,
    /// Fires once the capability handshake has gone out.
    pub ready: Signal,
    /// Fires when the connection is gone, for any reason.
    pub alive: Signal,
}

/// Chat server client.
pub struct Client {
    host: String,
    port: u16,
    username: String,
    password: String,
    delay: Duration,
    queue: std::sync::Arc<SendQueue>,
    shutdown_handle: SignalHandle,
    shutdown: Signal,
    task_done: parking_lot::Mutex<Vec<Signal>>,
}

impl Client {
    /// Create a client from configuration. No I/O happens until
    /// [`Client::connect`].
    pub fn new(config: &Config) -> Self {
        let (shutdown_handle, shutdown) = signal();
        Client {
            host: config.server.host.clone(),
            port: config.server.port,
            username: config.account.username.to_ascii_lowercase(),
            password: config.account.password.clone(),
            delay: config.send_delay(),
            queue: std::sync::Arc::new(SendQueue::new()),
            shutdown_handle,
            shutdown,
            task_done: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The bot's login name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// A sending handle backed by this client's queue.
    pub fn sender(&self) -> Sender {
        Sender::new(self.queue.clone())
    }

    /// Queue an outbound event.
    pub fn send(&self, event: OutboundEvent) -> Receipt {
        self.queue.push(event)
    }

    /// Whether a connection's tasks are still running.
    pub fn is_connected(&self) -> bool {
        self.task_done.lock().iter().any(|task| !task.is_fired())
    }

    /// Tear the connection down and wait for the reader and writer tasks
    /// to finish. The socket is closed once both have dropped their halves.
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.shutdown_handle.fire();
        let pending: Vec<Signal> = self.task_done.lock().clone();
        for task in pending {
            task.wait().await;
        }
    }

    /// Connect, log in, and spawn the connection tasks.
    pub async fn connect(&self) -> Result<Connection> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        info!(host = %self.host, port = self.port, "connected");

        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, LineCodec::new());
        let writer = FramedWrite::new(write_half, LineCodec::new());

        let (ready_handle, ready) = signal();
        let (alive_handle, alive) = signal();
        let (writer_done_handle, writer_done) = signal();
        let (reader_done_handle, reader_done) = signal();
        *self.task_done.lock() = vec![writer_done, reader_done];
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        // Login sequence goes through the queue like everything else, so it
        // is on the wire before any later traffic.
        self.queue.push(OutboundEvent::Raw(Message::new(
            "PASS",
            vec![self.password.clone()],
        )));
        self.queue.push(OutboundEvent::Raw(Message::new(
            "NICK",
            vec![self.username.clone()],
        )));
        self.queue.push(OutboundEvent::Raw(Message::with_trailing(
            "USER",
            vec![self.username.clone(), "8".to_owned(), "*".to_owned()],
            self.username.clone(),
        )));

        self.spawn_writer(writer, alive_handle.clone(), alive.clone(), writer_done_handle);
        self.spawn_reader(reader, events_tx, ready_handle, alive_handle, reader_done_handle);

        Ok(Connection {
            events: events_rx,
            ready,
            alive,
        })
    }

    fn spawn_writer(
        &self,
        mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, LineCodec>,
        alive_handle: SignalHandle,
        alive: Signal,
        done: SignalHandle,
    ) {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            loop {
                let (event, slip) = tokio::select! {
                    item = queue.pop() => item,
                    _ = shutdown.wait() => break,
                    _ = alive.wait() => break,
                };

                let line = event.to_message().to_string();
                match writer.send(line).await {
                    Ok(()) => {
                        let _ = slip.send(true);
                    }
                    Err(e) => {
                        error!(error = %e, "write failed, closing connection");
                        let _ = slip.send(false);
                        break;
                    }
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            alive_handle.fire();
            queue.clear();
            done.fire();
            debug!("writer task finished");
        });
    }

    fn spawn_reader(
        &self,
        mut reader: FramedRead<tokio::net::tcp::OwnedReadHalf, LineCodec>,
        events_tx: mpsc::Sender<InboundEvent>,
        ready_handle: SignalHandle,
        alive_handle: SignalHandle,
        done: SignalHandle,
    ) {
        let codec = EventCodec::new(self.username.as_str());
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut welcomed = false;

            loop {
                let next = tokio::select! {
                    next = tokio::time::timeout(READ_TIMEOUT, reader.next()) => next,
                    _ = shutdown.wait() => break,
                };

                let line = match next {
                    Err(_) => {
                        warn!(timeout = ?READ_TIMEOUT, "read deadline exceeded, closing");
                        break;
                    }
                    Ok(None) => {
                        info!("connection closed by server");
                        break;
                    }
                    Ok(Some(Err(e))) => {
                        error!(error = %e, "read failed, closing connection");
                        break;
                    }
                    Ok(Some(Ok(line))) => line,
                };

                match codec.decode(&line) {
                    Err(e) => {
                        debug!(error = %e, line = %line, "ignoring unparsable line");
                    }
                    Ok(None) => {}
                    Ok(Some(ProtocolEvent::Welcome)) => {
                        if welcomed {
                            continue;
                        }
                        welcomed = true;
                        debug!("welcome received, requesting capabilities");

                        queue.push(OutboundEvent::CapReq(Capability::Membership));
                        queue.push(OutboundEvent::CapReq(Capability::Commands));
                        let receipt = queue.push(OutboundEvent::CapReq(Capability::Tags));

                        // Ready once the last request is on the wire. A
                        // dropped request means the handshake cannot
                        // complete, which is fatal.
                        let ready_handle = ready_handle.clone();
                        let alive_handle = alive_handle.clone();
                        tokio::spawn(async move {
                            if receipt.wait().await {
                                info!("handshake complete, client ready");
                                ready_handle.fire();
                            } else {
                                error!("capability request failed, closing connection");
                                alive_handle.fire();
                            }
                        });
                    }
                    Ok(Some(ProtocolEvent::Ping { params, token })) => {
                        queue.push(OutboundEvent::Pong { params, token });
                    }
                    Ok(Some(ProtocolEvent::Event(event))) => {
                        if events_tx.send(event).await.is_err() {
                            debug!("event receiver dropped, closing connection");
                            break;
                        }
                    }
                }
            }

            alive_handle.fire();
            done.fire();
            debug!("reader task finished");
        });
    }
}
