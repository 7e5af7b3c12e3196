//! Per-connection TCP state machine for passively opened connections.
//!
//! A connection is created by the [Server](super::Server) when a `SYN` arrives
//! and lives until the peer acknowledges our `FIN`. Data is accepted strictly
//! in order: a segment is only processed when its sequence number equals the
//! next expected one. There is no retransmission, reassembly, or window
//! enforcement.

use std::{fmt, io};

use rand::RngCore;
use rand::rngs::OsRng;

use super::headers::{MSS, TcpHeader};
use super::{Socket, TcpSegment};
use crate::net::Transport;
use crate::{Error, Result};
use crate::{debug, warn};

/// Our window size advertised to the peer.
const RCV_WND_SIZE: u16 = 4096;

/// Handler invoked with in-order payload bytes, and once with an empty slice
/// when the peer's `FIN` is accepted.
pub type ReceiveCallback = Box<dyn FnMut(&mut Connection<'_>, &[u8]) + Send>;

/// Different TCP connection states.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
pub enum ConnectionState {
    /// `SYN_ACK` sent, waiting for the peer to acknowledge it.
    SYN_RECEIVED,
    /// Represents an open connection, data received can be delivered to the
    /// user.
    ESTABLISHED,
    /// Local `FIN` sent, waiting for the peer to acknowledge it. Peer data is
    /// still delivered.
    FIN_WAIT,
    /// The peer acknowledged our `FIN`; the connection is removed from the
    /// table.
    CLOSED,
}

/// Send Sequence Space.
///
/// (RFC 793 3.2)
#[derive(Debug)]
pub struct SendSeqSpace {
    /// SND.NXT - send next
    nxt: u32,
    /// ISS     - initial send sequence number
    iss: u32,
}

/// Receive Sequence Space.
///
/// (RFC 793 3.2)
#[derive(Debug)]
pub struct RecvSeqSpace {
    /// RCV.NXT - receive next
    nxt: u32,
    /// IRS     - initial receive sequence number
    irs: u32,
}

/// Transmission Control Block (TCB).
#[allow(clippy::upper_case_acronyms)]
pub struct TCB {
    /// Current state of the TCP connection.
    state: ConnectionState,
    /// Socket addresses of the local and peer TCPs.
    sock: Socket,
    /// Send Sequence Space for the TCP connection.
    snd: SendSeqSpace,
    /// Receive Sequence Space for the TCP connection.
    rcv: RecvSeqSpace,
    /// Application handler for delivered data.
    on_receive: Option<ReceiveCallback>,
}

impl TCB {
    /// Processes a connection request from the peer: draws an initial send
    /// sequence number, transmits `SYN_ACK`, and returns the TCB in
    /// `SYN_RECEIVED`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SYN_ACK` segment could not be constructed or
    /// transmitted.
    pub(crate) fn open_conn_passive(
        sock: Socket,
        tcph: &TcpHeader,
        transport: &dyn Transport,
    ) -> Result<Self> {
        let iss = random_iss();

        let mut conn = TCB {
            state: ConnectionState::SYN_RECEIVED,
            sock,
            snd: SendSeqSpace { nxt: iss, iss },
            rcv: RecvSeqSpace {
                // The SYN consumes one sequence number.
                nxt: tcph.seq_number().wrapping_add(1),
                irs: tcph.seq_number(),
            },
            on_receive: None,
        };

        // <SEQ=ISS><ACK=RCV.NXT><CTL=SYN,ACK>
        let syn_ack = conn.create_syn_ack()?;
        conn.transmit(transport, syn_ack)?;
        conn.snd.nxt = conn.snd.nxt.wrapping_add(1);

        debug!(
            "[{}] (LISTEN) received SYN, sent SYN_ACK (iss: {iss}, irs: {}): LISTEN -> SYN_RECEIVED",
            conn.sock, conn.rcv.irs
        );

        Ok(conn)
    }

    /// Returns the current state of the connection.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the connection 4-tuple.
    pub fn socket(&self) -> Socket {
        self.sock
    }

    /// Returns the next sequence number this side will send (SND.NXT).
    pub fn snd_nxt(&self) -> u32 {
        self.snd.nxt
    }

    /// Returns the initial send sequence number.
    pub fn iss(&self) -> u32 {
        self.snd.iss
    }

    /// Returns the next sequence number expected from the peer (RCV.NXT),
    /// which is also the acknowledgment number carried by every segment we
    /// send.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv.nxt
    }

    /// Returns the peer's initial sequence number.
    pub fn irs(&self) -> u32 {
        self.rcv.irs
    }

    /// Returns `true` once a local `FIN` has been transmitted.
    pub fn fin_sent(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::FIN_WAIT | ConnectionState::CLOSED
        )
    }

    /// Creates a `SYN_ACK` segment in response to a peer's connection
    /// request.
    fn create_syn_ack(&self) -> Result<TcpSegment> {
        let mut syn_ack = TcpHeader::new(
            self.sock.src.port,
            self.sock.dst.port,
            self.snd.nxt,
            RCV_WND_SIZE,
        );

        // Acknowledge the peer's SYN.
        syn_ack.set_ack_number(self.rcv.nxt);
        syn_ack.set_syn();
        syn_ack.set_ack();
        syn_ack.set_option_mss(MSS as u16)?;
        syn_ack.set_checksum(self.sock.src.addr, self.sock.dst.addr, &[]);

        Ok(TcpSegment::new(syn_ack, &[]))
    }

    /// Creates an `ACK` segment, carrying `payload` if non-empty.
    fn create_ack(&self, payload: &[u8]) -> Result<TcpSegment> {
        let mut ack = TcpHeader::new(
            self.sock.src.port,
            self.sock.dst.port,
            self.snd.nxt,
            RCV_WND_SIZE,
        );

        ack.set_ack_number(self.rcv.nxt);
        ack.set_ack();
        ack.set_checksum(self.sock.src.addr, self.sock.dst.addr, payload);

        Ok(TcpSegment::new(ack, payload))
    }

    /// Creates a `FIN_ACK` segment for a graceful connection termination.
    fn create_fin_ack(&self) -> Result<TcpSegment> {
        let mut fin_ack = TcpHeader::new(
            self.sock.src.port,
            self.sock.dst.port,
            self.snd.nxt,
            RCV_WND_SIZE,
        );

        fin_ack.set_ack_number(self.rcv.nxt);
        fin_ack.set_fin();
        fin_ack.set_ack();
        fin_ack.set_checksum(self.sock.src.addr, self.sock.dst.addr, &[]);

        Ok(TcpSegment::new(fin_ack, &[]))
    }

    fn transmit(&self, transport: &dyn Transport, segment: TcpSegment) -> Result<()> {
        transport.send(&segment.to_be_bytes()?, self.sock.dst.addr)
    }
}

impl fmt::Debug for TCB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCB")
            .field("state", &self.state)
            .field("sock", &self.sock)
            .field("snd", &self.snd)
            .field("rcv", &self.rcv)
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

/// Handle to a connection in the table, borrowed for the duration of a
/// callback or a [Server](super::Server) call.
///
/// The handle never owns the connection; the server does.
pub struct Connection<'a> {
    tcb: &'a mut TCB,
    transport: &'a dyn Transport,
}

impl<'a> Connection<'a> {
    pub(crate) fn new(tcb: &'a mut TCB, transport: &'a dyn Transport) -> Self {
        Self { tcb, transport }
    }

    /// Returns the connection 4-tuple.
    pub fn socket(&self) -> Socket {
        self.tcb.sock
    }

    /// Returns the current state of the connection.
    pub fn state(&self) -> ConnectionState {
        self.tcb.state
    }

    /// Returns the connection's transmission control block.
    pub fn tcb(&self) -> &TCB {
        self.tcb
    }

    /// Registers the handler for delivered data, replacing any previous one.
    ///
    /// The handler receives each in-order payload, and an empty slice once the
    /// peer's `FIN` is accepted.
    pub fn set_receive_callback<F>(&mut self, on_receive: F)
    where
        F: FnMut(&mut Connection<'_>, &[u8]) + Send + 'static,
    {
        self.tcb.on_receive = Some(Box::new(on_receive));
    }

    /// Transmits `buf` to the peer as back-to-back `ACK` segments of at most
    /// [MSS] bytes each, returning the number of bytes sent.
    ///
    /// Each segment acknowledges the latest received data. Nothing waits for
    /// the peer's acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the local side already sent `FIN`, or if a segment
    /// could not be constructed or transmitted. Segments transmitted before
    /// the failing one stay sent: `snd.nxt` has already moved past them, and
    /// [TCB::snd_nxt] tells how far.
    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        if self.tcb.fin_sent() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "unable to send application data after close",
            )));
        }

        for chunk in buf.chunks(MSS) {
            let ack = self.tcb.create_ack(chunk)?;
            self.tcb.transmit(self.transport, ack)?;
            self.tcb.snd.nxt = self.tcb.snd.nxt.wrapping_add(chunk.len() as u32);
        }

        debug!(
            "[{}] ({:?}) sent {} bytes of application data (snd.nxt: {})",
            self.tcb.sock,
            self.tcb.state,
            buf.len(),
            self.tcb.snd.nxt
        );

        Ok(buf.len())
    }

    /// Transmits `FIN_ACK` and enters `FIN_WAIT`.
    ///
    /// Returns immediately; the connection is removed once the peer
    /// acknowledges the `FIN`. Closing an already closing connection is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the `FIN_ACK` segment could not be constructed or
    /// transmitted.
    pub fn close(&mut self) -> Result<()> {
        if self.tcb.fin_sent() {
            debug!(
                "[{}] ({:?}) close call received: ignoring",
                self.tcb.sock, self.tcb.state
            );

            return Ok(());
        }

        // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=FIN,ACK>
        let fin_ack = self.tcb.create_fin_ack()?;
        self.tcb.transmit(self.transport, fin_ack)?;
        self.tcb.snd.nxt = self.tcb.snd.nxt.wrapping_add(1);

        let prev = self.tcb.state;
        self.tcb.state = ConnectionState::FIN_WAIT;

        debug!(
            "[{}] ({prev:?}) close call received, sent FIN_ACK: {prev:?} -> FIN_WAIT",
            self.tcb.sock
        );

        Ok(())
    }

    /// Processes an incoming segment for this connection.
    ///
    /// Afterwards the state is [ConnectionState::CLOSED] if the segment
    /// acknowledged our `FIN`.
    pub(crate) fn on_segment(&mut self, tcph: &TcpHeader, payload: &[u8]) {
        let sock = self.tcb.sock;

        if self.tcb.state == ConnectionState::SYN_RECEIVED
            && tcph.ack()
            && !wrapping_lt(tcph.ack_number(), self.tcb.snd.iss.wrapping_add(1))
        {
            self.tcb.state = ConnectionState::ESTABLISHED;

            debug!("[{sock}] (SYN_RECEIVED) received ACK of SYN: SYN_RECEIVED -> ESTABLISHED");
        }

        let in_order = tcph.seq_number() == self.tcb.rcv.nxt;

        if !in_order {
            debug!(
                "[{sock}] ({:?}) received out-of-order segment (seq: {}, expected: {}): ignoring {} bytes",
                self.tcb.state,
                tcph.seq_number(),
                self.tcb.rcv.nxt,
                payload.len()
            );
        }

        if in_order && !payload.is_empty() {
            self.deliver(payload);
            self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(payload.len() as u32);
        }

        if in_order && tcph.fin() {
            // FIN consumes one sequence number.
            self.tcb.rcv.nxt = self.tcb.rcv.nxt.wrapping_add(1);

            debug!(
                "[{sock}] ({:?}) received FIN, signalling half-close",
                self.tcb.state
            );

            self.deliver(&[]);
        }

        // The peer acknowledging sequence space we have not counted is
        // answered regardless of the acceptance test above. Plain numeric
        // comparison, no sequence wrap.
        let acks_ahead = tcph.ack() && tcph.ack_number() > self.tcb.snd.nxt;

        if !payload.is_empty() || tcph.syn() || tcph.fin() || acks_ahead {
            // <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>
            if let Err(err) = self
                .tcb
                .create_ack(&[])
                .and_then(|ack| self.tcb.transmit(self.transport, ack))
            {
                warn!(
                    "[{sock}] ({:?}) failed to send ACK: {err}",
                    self.tcb.state
                );
            }
        }

        if tcph.ack() && self.tcb.fin_sent() && tcph.ack_number() == self.tcb.snd.nxt {
            self.tcb.state = ConnectionState::CLOSED;

            debug!("[{sock}] (FIN_WAIT) received ACK of FIN: FIN_WAIT -> CLOSED");
        }
    }

    /// Hands `payload` to the receive handler, if any.
    fn deliver(&mut self, payload: &[u8]) {
        match self.tcb.on_receive.take() {
            Some(mut on_receive) => {
                on_receive(self, payload);

                // The handler may have installed a replacement for itself.
                if self.tcb.on_receive.is_none() {
                    self.tcb.on_receive = Some(on_receive);
                }
            }
            None => {
                debug!(
                    "[{}] ({:?}) no receive handler registered: discarding {} bytes",
                    self.tcb.sock,
                    self.tcb.state,
                    payload.len()
                );
            }
        }
    }
}

impl fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tcb", &self.tcb)
            .finish_non_exhaustive()
    }
}

/// Draws a random 16-bit initial send sequence number.
fn random_iss() -> u32 {
    let mut bytes = [0u8; 2];
    OsRng.fill_bytes(&mut bytes);

    u16::from_be_bytes(bytes) as u32
}

/// Returns `true` if `lhs` precedes `rhs` in sequence space.
fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    // RFC 1323 (2.3)
    //
    // TCP determines if a data segment is "old" or "new" by testing whether
    // its sequence number is within 2**31 bytes of the left edge of the window.
    lhs.wrapping_sub(rhs) > (1 << 31)
}
