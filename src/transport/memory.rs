//! In-process association, used for transport-free runs and tests.
//!
//! Each direction of an association is an unbounded queue drained by its own
//! delivery thread, so a handler blocking on one side never stalls the other.

use crate::error::{BenchError, Result};
use crate::protocol::AddressedMessage;
use crate::transport::{Channel, ChannelHandler, Endpoint, Transport};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

type LossRule = Arc<dyn Fn(Direction, &AddressedMessage) -> bool + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<u16, Arc<Listener>>>,
    next_port: AtomicU16,
}

impl Registry {
    fn allocate_port(&self, listeners: &HashMap<u16, Arc<Listener>>) -> u16 {
        loop {
            let port = self.next_port.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if port != 0 && !listeners.contains_key(&port) {
                return port;
            }
        }
    }
}

struct Listener {
    handler: Arc<dyn ChannelHandler>,
    associations: Mutex<Vec<Half>>,
}

/// One side of an association: the channel it sends on and the thread delivering to it
struct Half {
    channel: Arc<MemoryChannel>,
    worker: JoinHandle<()>,
}

/// Transport whose endpoints only exist inside this process.
///
/// Clones share one address space, so bind on one clone and connect on another.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    registry: Arc<Registry>,
    loss: Option<LossRule>,
    fragment_size: Option<usize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently drop every message for which `rule` returns true
    pub fn with_loss<R>(mut self, rule: R) -> Self
    where
        R: Fn(Direction, &AddressedMessage) -> bool + Send + Sync + 'static,
    {
        self.loss = Some(Arc::new(rule));
        self
    }

    /// Split outbound payloads larger than `size` bytes into incomplete fragments
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    fn channel(&self, tx: Sender<AddressedMessage>, direction: Direction) -> Arc<MemoryChannel> {
        Arc::new(MemoryChannel {
            tx: Mutex::new(Some(tx)),
            direction,
            loss: self.loss.clone(),
            fragment_size: self.fragment_size,
        })
    }
}

struct MemoryChannel {
    tx: Mutex<Option<Sender<AddressedMessage>>>,
    direction: Direction,
    loss: Option<LossRule>,
    fragment_size: Option<usize>,
}

impl Channel for MemoryChannel {
    fn send(&self, msg: AddressedMessage) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(BenchError::ChannelClosed)?;

        if let Some(loss) = &self.loss {
            if loss(self.direction, &msg) {
                debug!(
                    direction = ?self.direction,
                    stream_id = msg.stream_id,
                    "Dropping message"
                );
                return Ok(());
            }
        }

        let fragments = match self.fragment_size {
            Some(size) => msg.split(size),
            None => vec![msg],
        };
        for fragment in fragments {
            tx.send(fragment).map_err(|_| BenchError::ChannelClosed)?;
        }
        Ok(())
    }

    fn close(&self) {
        // dropping the sender ends the peer's delivery thread
        if self.tx.lock().take().is_some() {
            debug!(direction = ?self.direction, "Closing in-memory channel");
        }
    }

    fn is_open(&self) -> bool {
        self.tx.lock().is_some()
    }
}

fn spawn_delivery(
    rx: Receiver<AddressedMessage>,
    local: Arc<MemoryChannel>,
    handler: Arc<dyn ChannelHandler>,
    name: &str,
) -> Result<JoinHandle<()>> {
    let worker = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            for msg in rx.iter() {
                handler.message_received(msg);
            }
            // the peer hung up; take our half down with it
            local.close();
            handler.channel_inactive();
        })?;
    Ok(worker)
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn supports_streams(&self) -> bool {
        true
    }

    fn bind(&self, addr: SocketAddr, handler: Arc<dyn ChannelHandler>) -> Result<Box<dyn Endpoint>> {
        let mut listeners = self.registry.listeners.lock();
        let port = match addr.port() {
            0 => self.registry.allocate_port(&listeners),
            port if listeners.contains_key(&port) => {
                return Err(BenchError::connection(
                    "bind",
                    addr,
                    io::Error::from(io::ErrorKind::AddrInUse),
                ));
            }
            port => port,
        };

        let listener = Arc::new(Listener {
            handler,
            associations: Mutex::new(Vec::new()),
        });
        listeners.insert(port, Arc::clone(&listener));

        let local_addr = SocketAddr::new(addr.ip(), port);
        info!(transport = "memory", address = %local_addr, "Listening");
        Ok(Box::new(MemoryEndpoint {
            local_addr,
            listener: Some((Arc::clone(&self.registry), listener)),
            halves: Vec::new(),
            closed: false,
        }))
    }

    fn connect(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Box<dyn Endpoint>> {
        let listener = self
            .registry
            .listeners
            .lock()
            .get(&addr.port())
            .cloned()
            .ok_or_else(|| {
                BenchError::connection(
                    "connect to",
                    addr,
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                )
            })?;

        let (to_server, server_rx) = channel::unbounded();
        let (to_client, client_rx) = channel::unbounded();
        let client_channel = self.channel(to_server, Direction::ClientToServer);
        let server_channel = self.channel(to_client, Direction::ServerToClient);

        listener
            .handler
            .channel_active(Arc::clone(&server_channel) as Arc<dyn Channel>);
        handler.channel_active(Arc::clone(&client_channel) as Arc<dyn Channel>);

        let server_worker = spawn_delivery(
            server_rx,
            Arc::clone(&server_channel),
            Arc::clone(&listener.handler),
            "memory-server",
        )?;
        listener.associations.lock().push(Half {
            channel: server_channel,
            worker: server_worker,
        });

        let client_worker =
            spawn_delivery(client_rx, Arc::clone(&client_channel), handler, "memory-client")?;

        let local_addr = {
            let listeners = self.registry.listeners.lock();
            SocketAddr::new(addr.ip(), self.registry.allocate_port(&listeners))
        };
        info!(transport = "memory", local = %local_addr, remote = %addr, "Connected");
        Ok(Box::new(MemoryEndpoint {
            local_addr,
            listener: None,
            halves: vec![Half {
                channel: client_channel,
                worker: client_worker,
            }],
            closed: false,
        }))
    }
}

struct MemoryEndpoint {
    local_addr: SocketAddr,
    listener: Option<(Arc<Registry>, Arc<Listener>)>,
    halves: Vec<Half>,
    closed: bool,
}

impl Endpoint for MemoryEndpoint {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some((registry, listener)) = self.listener.take() {
            registry.listeners.lock().remove(&self.local_addr.port());
            self.halves.extend(listener.associations.lock().drain(..));
        }

        for half in &self.halves {
            half.channel.close();
        }
        for half in self.halves.drain(..) {
            if half.worker.join().is_err() {
                warn!("Delivery thread panicked");
            }
        }
        debug!(address = %self.local_addr, "Endpoint closed");
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
