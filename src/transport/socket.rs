use crate::constants::CONNECT_TIMEOUT_MS;
use crate::error::{BenchError, Result};
use crate::protocol::AddressedMessage;
use crate::transport::framing::{AssociationFraming, FixedLengthFraming, Framing};
use crate::transport::{Channel, ChannelHandler, Endpoint, Transport};
use parking_lot::Mutex;
use std::io::{self, BufReader};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// TCP transport parameterised by how messages are framed on the stream.
///
/// One reader thread per association delivers inbound messages to the
/// handler; sends happen on the caller's thread.
pub struct SocketTransport<F> {
    framing: Arc<F>,
    name: &'static str,
    streams: bool,
    fragment_size: Option<usize>,
}

/// Plain TCP carrying bare 8-byte frames
pub type TcpTransport = SocketTransport<FixedLengthFraming>;

/// SCTP-style association emulated over TCP: every frame carries protocol and stream ids
pub type MultiStreamTransport = SocketTransport<AssociationFraming>;

impl SocketTransport<FixedLengthFraming> {
    pub fn new() -> Self {
        Self {
            framing: Arc::new(FixedLengthFraming),
            name: "tcp",
            streams: false,
            fragment_size: None,
        }
    }
}

impl Default for SocketTransport<FixedLengthFraming> {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTransport<AssociationFraming> {
    pub fn new() -> Self {
        Self {
            framing: Arc::new(AssociationFraming),
            name: "multistream",
            streams: true,
            fragment_size: None,
        }
    }

    /// Split outbound payloads larger than `size` bytes into incomplete fragments
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }
}

impl Default for SocketTransport<AssociationFraming> {
    fn default() -> Self {
        Self::new()
    }
}

struct SocketChannel<F> {
    writer: Mutex<TcpStream>,
    control: TcpStream,
    open: AtomicBool,
    framing: Arc<F>,
    peer: SocketAddr,
    fragment_size: Option<usize>,
}

impl<F: Framing> Channel for SocketChannel<F> {
    fn send(&self, msg: AddressedMessage) -> Result<()> {
        if !self.is_open() {
            return Err(BenchError::ChannelClosed);
        }
        let fragments = match self.fragment_size {
            Some(size) => msg.split(size),
            None => vec![msg],
        };

        let mut writer = self.writer.lock();
        for fragment in &fragments {
            self.framing.write_frame(&mut *writer, fragment).map_err(|e| {
                warn!(error = %e, peer = %self.peer, "Failed to send message");
                BenchError::Io(e)
            })?;
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.peer, "Closing association");
            // unblocks the reader thread
            let _ = self.control.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

fn open_channel<F: Framing>(
    stream: TcpStream,
    framing: &Arc<F>,
    fragment_size: Option<usize>,
    handler: &Arc<dyn ChannelHandler>,
    name: &'static str,
) -> Result<(Arc<dyn Channel>, JoinHandle<()>)> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let channel = Arc::new(SocketChannel {
        writer: Mutex::new(stream.try_clone()?),
        control: stream.try_clone()?,
        open: AtomicBool::new(true),
        framing: Arc::clone(framing),
        peer,
        fragment_size,
    });

    handler.channel_active(Arc::clone(&channel) as Arc<dyn Channel>);

    let reader_channel = Arc::clone(&channel);
    let handler = Arc::clone(handler);
    let worker = thread::Builder::new()
        .name(format!("{}-reader", name))
        .spawn(move || read_loop(stream, reader_channel, handler))?;

    debug!(transport = name, peer = %peer, "Association established");
    Ok((channel as Arc<dyn Channel>, worker))
}

fn read_loop<F: Framing>(
    stream: TcpStream,
    channel: Arc<SocketChannel<F>>,
    handler: Arc<dyn ChannelHandler>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        match channel.framing.read_frame(&mut reader) {
            Ok(msg) => handler.message_received(msg),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = %channel.peer, "Peer closed association");
                break;
            }
            Err(e) => {
                if channel.is_open() {
                    warn!(error = %e, peer = %channel.peer, "Failed to receive message");
                    handler.exception_caught(BenchError::Io(e));
                } else {
                    debug!(peer = %channel.peer, "Reader stopped after local close");
                }
                break;
            }
        }
    }
    channel.close();
    handler.channel_inactive();
}

impl<F: Framing> Transport for SocketTransport<F> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports_streams(&self) -> bool {
        self.streams
    }

    fn bind(&self, addr: SocketAddr, handler: Arc<dyn ChannelHandler>) -> Result<Box<dyn Endpoint>> {
        debug!(addr = %addr, transport = self.name, "Binding listener");
        let listener = TcpListener::bind(addr).map_err(|e| {
            warn!(error = %e, "Failed to bind listener");
            BenchError::connection("bind", addr, e)
        })?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let channels: Arc<Mutex<Vec<Arc<dyn Channel>>>> = Arc::new(Mutex::new(Vec::new()));
        let workers: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let shutdown = Arc::clone(&shutdown);
            let channels = Arc::clone(&channels);
            let workers = Arc::clone(&workers);
            let framing = Arc::clone(&self.framing);
            let fragment_size = self.fragment_size;
            let name = self.name;

            thread::Builder::new()
                .name(format!("{}-acceptor", name))
                .spawn(move || {
                    for stream in listener.incoming() {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        match stream {
                            Ok(stream) => {
                                match open_channel(stream, &framing, fragment_size, &handler, name) {
                                    Ok((channel, worker)) => {
                                        channels.lock().push(channel);
                                        workers.lock().push(worker);
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "Failed to set up accepted association");
                                        handler.exception_caught(e);
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to accept association"),
                        }
                    }
                    debug!("Acceptor stopped");
                })?
        };

        info!(transport = self.name, address = %local_addr, "Listening");
        Ok(Box::new(SocketEndpoint {
            local_addr,
            shutdown,
            channels,
            workers,
            acceptor: Some(acceptor),
            closed: false,
        }))
    }

    fn connect(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<Box<dyn Endpoint>> {
        debug!(addr = %addr, transport = self.name, "Connecting");
        let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(CONNECT_TIMEOUT_MS))
            .map_err(|e| {
                warn!(error = %e, "Failed to connect");
                BenchError::connection("connect to", addr, e)
            })?;
        let local_addr = stream.local_addr()?;
        let (channel, worker) =
            open_channel(stream, &self.framing, self.fragment_size, &handler, self.name)?;

        info!(transport = self.name, local = %local_addr, remote = %addr, "Connected");
        Ok(Box::new(SocketEndpoint {
            local_addr,
            shutdown: Arc::new(AtomicBool::new(false)),
            channels: Arc::new(Mutex::new(vec![channel])),
            workers: Arc::new(Mutex::new(vec![worker])),
            acceptor: None,
            closed: false,
        }))
    }
}

struct SocketEndpoint {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    channels: Arc<Mutex<Vec<Arc<dyn Channel>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    acceptor: Option<JoinHandle<()>>,
    closed: bool,
}

impl SocketEndpoint {
    fn stop_acceptor(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);

        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        match TcpStream::connect_timeout(&wake_addr, Duration::from_millis(CONNECT_TIMEOUT_MS)) {
            Ok(_) => {
                if acceptor.join().is_err() {
                    warn!("Acceptor thread panicked");
                }
            }
            Err(e) => warn!(error = %e, "Could not wake acceptor, detaching it"),
        }
    }
}

impl Endpoint for SocketEndpoint {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_acceptor();

        let channels: Vec<_> = self.channels.lock().drain(..).collect();
        for channel in channels {
            channel.close();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
        debug!(address = %self.local_addr, "Endpoint closed");
    }
}

impl Drop for SocketEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
