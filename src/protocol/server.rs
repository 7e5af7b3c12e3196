//! Connection demultiplexer: routes inbound segments for the listening port to
//! their connection, creating one whenever a `SYN` arrives.

use std::collections::HashMap;
use std::fmt;

use super::connection::{Connection, ConnectionState, TCB};
use super::headers::{TcpHeader, segment_checksum};
use super::{Socket, SocketAddr, TcpSegment};
use crate::net::Transport;
use crate::{Error, Result};
use crate::{debug, error, warn};

/// Handler invoked once per newly accepted connection.
pub type AcceptCallback = Box<dyn FnMut(&mut Connection<'_>) + Send>;

/// Passive TCP endpoint listening on a single port.
///
/// Owns the table of active connections, keyed by 4-tuple. Every inbound
/// segment goes through [Server::on_segment_received] on one dispatch thread;
/// callbacks run synchronously on that thread.
pub struct Server<T> {
    port: u16,
    transport: T,
    connections: HashMap<Socket, TCB>,
    on_accept: Option<AcceptCallback>,
}

impl<T: Transport> Server<T> {
    /// Creates a server accepting connections on `port`, transmitting through
    /// `transport`.
    pub fn new(transport: T, port: u16) -> Self {
        Self {
            port,
            transport,
            connections: HashMap::new(),
            on_accept: None,
        }
    }

    /// Returns the listening port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Registers the handler for newly accepted connections, replacing any
    /// previous one.
    pub fn set_accept_callback<F>(&mut self, on_accept: F)
    where
        F: FnMut(&mut Connection<'_>) + Send + 'static,
    {
        self.on_accept = Some(Box::new(on_accept));
    }

    /// Returns the number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if there are no active connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Returns `true` if `sock` is in the connection table.
    pub fn contains(&self, sock: &Socket) -> bool {
        self.connections.contains_key(sock)
    }

    /// Returns an iterator over the 4-tuples of active connections.
    pub fn sockets(&self) -> impl Iterator<Item = &Socket> {
        self.connections.keys()
    }

    /// Returns a handle to the connection identified by `sock`, if present.
    pub fn connection(&mut self, sock: &Socket) -> Option<Connection<'_>> {
        let transport: &dyn Transport = &self.transport;

        self.connections
            .get_mut(sock)
            .map(|tcb| Connection::new(tcb, transport))
    }

    /// Sends `buf` on the connection identified by `sock`.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotFound] if the connection is not in the table, or any
    /// error from [Connection::send].
    pub fn send(&mut self, sock: &Socket, buf: &[u8]) -> Result<usize> {
        self.connection(sock)
            .ok_or(Error::NotFound(*sock))?
            .send(buf)
    }

    /// Closes the connection identified by `sock`.
    ///
    /// # Errors
    ///
    /// Returns [Error::NotFound] if the connection is not in the table, or any
    /// error from [Connection::close].
    pub fn close(&mut self, sock: &Socket) -> Result<()> {
        self.connection(sock)
            .ok_or(Error::NotFound(*sock))?
            .close()
    }

    /// Processes one inbound TCP segment (header, options, and payload) sent
    /// from `src` to `dst`.
    ///
    /// Segments for other ports, with an invalid checksum, or for unknown
    /// connections are dropped; none of these produce a reply.
    pub fn on_segment_received(&mut self, src: [u8; 4], dst: [u8; 4], segment: &[u8]) {
        let (tcph, payload) = match TcpSegment::split(segment) {
            Ok(parts) => parts,
            Err(err) => {
                warn!("dropping malformed TCP segment: {err}");
                return;
            }
        };

        if tcph.dst_port() != self.port {
            return;
        }

        if !self.transport.ignore_checksum() && segment_checksum(segment, src, dst) != 0 {
            warn!(
                "dropping segment with invalid checksum (0x{:04x}) from {}",
                tcph.checksum(),
                SocketAddr::new(src, tcph.src_port())
            );
            return;
        }

        // Stored in reverse order of peer's perspective.
        let sock = Socket::new(
            SocketAddr::new(dst, tcph.dst_port()),
            SocketAddr::new(src, tcph.src_port()),
        );

        log_segment(&sock, &tcph, payload);

        if tcph.syn() {
            if self.connections.remove(&sock).is_some() {
                debug!("[{sock}] received SYN for existing connection: replacing");
            }

            let tcb = match TCB::open_conn_passive(sock, &tcph, &self.transport) {
                Ok(tcb) => tcb,
                Err(err) => {
                    error!("[{sock}] failed to accept connection: {err}");
                    return;
                }
            };

            self.connections.insert(sock, tcb);

            debug!(
                "[{sock}] accepted connection, active connections: {}",
                self.connections.len()
            );

            if let Some(on_accept) = self.on_accept.as_mut() {
                if let Some(tcb) = self.connections.get_mut(&sock) {
                    on_accept(&mut Connection::new(tcb, &self.transport));
                }
            }

            return;
        }

        let Some(tcb) = self.connections.get_mut(&sock) else {
            warn!("[{sock}] segment for unknown connection: dropping");
            return;
        };

        let mut conn = Connection::new(tcb, &self.transport);
        conn.on_segment(&tcph, payload);

        if conn.state() == ConnectionState::CLOSED {
            self.connections.remove(&sock);

            debug!(
                "[{sock}] removed connection, active connections remaining: {}",
                self.connections.len()
            );
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.port)
            .field("transport", &self.transport)
            .field("connections", &self.connections)
            .field("on_accept", &self.on_accept.is_some())
            .finish()
    }
}

/// Logs an incoming TCP segment.
fn log_segment(sock: &Socket, tcph: &TcpHeader, payload: &[u8]) {
    if !crate::log::enabled(crate::log::Level::Debug) {
        return;
    }

    debug!(
        "[{sock}] received tcp segment | seq num: {}, ack num: {}, data offset: {}, ack: {}, psh: {}, rst: {}, syn: {}, fin: {}, window: {}, chksum: 0x{:04x}, mss: {:?}, {} bytes of payload",
        tcph.seq_number(),
        tcph.ack_number(),
        tcph.data_offset(),
        tcph.ack(),
        tcph.psh(),
        tcph.rst(),
        tcph.syn(),
        tcph.fin(),
        tcph.window(),
        tcph.checksum(),
        tcph.options().mss(),
        payload.len(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::*;
    use std::sync::{Arc, Mutex};

    const PEER_ISN: u32 = 1000;

    fn server() -> Server<RecordingTransport> {
        Server::new(RecordingTransport::new(), LISTEN_PORT)
    }

    fn socket() -> Socket {
        Socket::new(
            SocketAddr::new(LOCAL_ADDR, LISTEN_PORT),
            SocketAddr::new(PEER_ADDR, PEER_PORT),
        )
    }

    fn deliver<T: Transport>(server: &mut Server<T>, segment: SegmentBuilder) {
        server.on_segment_received(PEER_ADDR, LOCAL_ADDR, &segment.build());
    }

    /// Completes the handshake, returning our next sequence number.
    fn establish(server: &mut Server<RecordingTransport>) -> u32 {
        deliver(server, SegmentBuilder::new(PEER_ISN).syn());

        let syn_ack = server.transport().take().remove(0);
        let snd_nxt = syn_ack.tcp.seq_number() + 1;

        deliver(server, SegmentBuilder::new(PEER_ISN + 1).ack(snd_nxt));
        snd_nxt
    }

    #[test]
    fn syn_creates_connection_valid() {
        let mut server = server();
        let accepted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&accepted);

        server.set_accept_callback(move |conn| {
            assert_eq!(conn.state(), ConnectionState::SYN_RECEIVED);
            sink.lock().unwrap().push(conn.socket());
        });

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn());

        assert_eq!(server.len(), 1);
        assert!(server.contains(&socket()));
        assert_eq!(*accepted.lock().unwrap(), vec![socket()]);

        let sent = server.transport().take();

        assert_eq!(sent.len(), 1);
        assert!(sent[0].tcp.syn() && sent[0].tcp.ack());
        assert_eq!(sent[0].tcp.ack_number(), PEER_ISN + 1);
        assert_eq!(sent[0].dst, PEER_ADDR);

        let conn = server.connection(&socket()).unwrap();

        assert_eq!(conn.tcb().rcv_nxt(), PEER_ISN + 1);
        assert_eq!(conn.tcb().snd_nxt(), sent[0].tcp.seq_number() + 1);
    }

    #[test]
    fn handshake_without_accept_callback_valid() {
        let mut server = server();

        establish(&mut server);

        let conn = server.connection(&socket()).unwrap();

        assert_eq!(conn.state(), ConnectionState::ESTABLISHED);
    }

    #[test]
    fn unknown_port_dropped_valid() {
        let mut server = server();

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn().dst_port(LISTEN_PORT + 1));

        assert!(server.is_empty());
        assert_eq!(server.transport().len(), 0);
    }

    #[test]
    fn invalid_checksum_dropped_valid() {
        let mut server = server();

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn().corrupt_checksum());

        assert!(server.is_empty());
        assert_eq!(server.transport().len(), 0);
    }

    #[test]
    fn invalid_checksum_ignored_when_bypassed_valid() {
        let mut server = Server::new(RecordingTransport::ignoring_checksum(), LISTEN_PORT);

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn().corrupt_checksum());

        assert_eq!(server.len(), 1);
        assert_eq!(server.transport().len(), 1);
    }

    #[test]
    fn malformed_segment_dropped_valid() {
        let mut server = server();

        server.on_segment_received(PEER_ADDR, LOCAL_ADDR, &[0u8; 10]);

        assert!(server.is_empty());
        assert_eq!(server.transport().len(), 0);
    }

    #[test]
    fn unknown_connection_dropped_valid() {
        let mut server = server();

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).ack(1).payload(b"data"));

        assert!(server.is_empty());
        assert_eq!(server.transport().len(), 0);
    }

    #[test]
    fn connections_keyed_by_peer_port_valid() {
        let mut server = server();

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn());
        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn().src_port(PEER_PORT + 1));

        assert_eq!(server.len(), 2);
    }

    #[test]
    fn repeated_syn_replaces_connection_valid() {
        let mut server = server();

        establish(&mut server);
        server.send(&socket(), b"abc").unwrap();
        server.transport().take();

        deliver(&mut server, SegmentBuilder::new(9000).syn());

        assert_eq!(server.len(), 1);

        let conn = server.connection(&socket()).unwrap();

        assert_eq!(conn.state(), ConnectionState::SYN_RECEIVED);
        assert_eq!(conn.tcb().rcv_nxt(), 9001);
        assert_eq!(server.transport().len(), 1);
    }

    #[test]
    fn syn_ack_failure_not_inserted_invalid() {
        let mut server = server();
        let accepted = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&accepted);

        server.set_accept_callback(move |_| *sink.lock().unwrap() += 1);
        server.transport().set_failing(true);

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn());

        assert!(server.is_empty());
        assert_eq!(*accepted.lock().unwrap(), 0);
    }

    #[test]
    fn accept_callback_replaced_valid() {
        let mut server = server();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&calls);
        server.set_accept_callback(move |_| first.lock().unwrap().push("first"));

        let second = Arc::clone(&calls);
        server.set_accept_callback(move |_| second.lock().unwrap().push("second"));

        deliver(&mut server, SegmentBuilder::new(PEER_ISN).syn());

        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn data_routed_to_receive_callback_valid() {
        let mut server = server();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        server.set_accept_callback(move |conn| {
            let sink = Arc::clone(&sink);
            conn.set_receive_callback(move |_, payload| {
                sink.lock().unwrap().extend_from_slice(payload);
            });
        });

        let snd_nxt = establish(&mut server);

        deliver(
            &mut server,
            SegmentBuilder::new(PEER_ISN + 1).ack(snd_nxt).payload(b"hello "),
        );
        deliver(
            &mut server,
            SegmentBuilder::new(PEER_ISN + 7).ack(snd_nxt).payload(b"world"),
        );

        assert_eq!(&*received.lock().unwrap(), b"hello world");
    }

    #[test]
    fn close_completion_removes_connection_valid() {
        let mut server = server();
        let snd_nxt = establish(&mut server);

        server.close(&socket()).unwrap();

        let fin = server.transport().take().remove(0);

        assert!(fin.tcp.fin());
        assert_eq!(fin.tcp.seq_number(), snd_nxt);
        assert!(server.contains(&socket()));

        deliver(&mut server, SegmentBuilder::new(PEER_ISN + 1).ack(snd_nxt + 1));

        assert!(!server.contains(&socket()));

        // Anything afterwards is for an unknown connection.
        deliver(
            &mut server,
            SegmentBuilder::new(PEER_ISN + 1).ack(snd_nxt + 1).payload(b"late"),
        );

        assert!(server.is_empty());
        assert_eq!(server.transport().len(), 0);
    }

    #[test]
    fn operations_on_missing_connection_invalid() {
        let mut server = server();

        assert!(matches!(
            server.send(&socket(), b"x"),
            Err(Error::NotFound(sock)) if sock == socket()
        ));
        assert!(matches!(server.close(&socket()), Err(Error::NotFound(_))));
        assert!(server.connection(&socket()).is_none());
    }
}
