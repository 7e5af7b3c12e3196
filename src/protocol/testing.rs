//! Test doubles: a transport that records what it is asked to send, and a
//! builder for inbound segments.

use std::cell::{Cell, RefCell};
use std::io;

use super::TcpSegment;
use super::headers::TcpHeader;
use crate::net::Transport;
use crate::{Error, Result};

pub(crate) const LOCAL_ADDR: [u8; 4] = [10, 0, 0, 1];
pub(crate) const PEER_ADDR: [u8; 4] = [10, 0, 0, 2];
pub(crate) const LISTEN_PORT: u16 = 7000;
pub(crate) const PEER_PORT: u16 = 40000;

/// A segment handed to [RecordingTransport::send].
#[derive(Debug)]
pub(crate) struct Sent {
    pub(crate) dst: [u8; 4],
    pub(crate) tcp: TcpHeader,
    pub(crate) payload: Vec<u8>,
    pub(crate) raw: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
    sent: RefCell<Vec<Sent>>,
    ignore_checksum: bool,
    failing: Cell<bool>,
    remaining: Cell<Option<usize>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ignoring_checksum() -> Self {
        Self {
            ignore_checksum: true,
            ..Default::default()
        }
    }

    /// Makes every subsequent `send` fail without recording.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// Lets `count` more sends through, then fails every one after.
    pub(crate) fn fail_after(&self, count: usize) {
        self.remaining.set(Some(count));
    }

    /// Drains and returns everything sent so far.
    pub(crate) fn take(&self) -> Vec<Sent> {
        self.sent.take()
    }

    pub(crate) fn len(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, segment: &[u8], dst: [u8; 4]) -> Result<()> {
        match self.remaining.get() {
            Some(0) => self.failing.set(true),
            Some(n) => self.remaining.set(Some(n - 1)),
            None => {}
        }

        if self.failing.get() {
            return Err(Error::Io(io::Error::other("transport unavailable")));
        }

        let (tcp, payload) = TcpSegment::split(segment)?;

        self.sent.borrow_mut().push(Sent {
            dst,
            tcp,
            payload: payload.to_vec(),
            raw: segment.to_vec(),
        });

        Ok(())
    }

    fn ignore_checksum(&self) -> bool {
        self.ignore_checksum
    }
}

/// Builds a wire segment from the peer to the listening port.
#[derive(Debug, Clone)]
pub(crate) struct SegmentBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: Option<u32>,
    syn: bool,
    fin: bool,
    payload: Vec<u8>,
    corrupt: bool,
}

impl SegmentBuilder {
    pub(crate) fn new(seq: u32) -> Self {
        Self {
            src_port: PEER_PORT,
            dst_port: LISTEN_PORT,
            seq,
            ack: None,
            syn: false,
            fin: false,
            payload: Vec::new(),
            corrupt: false,
        }
    }

    pub(crate) fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub(crate) fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub(crate) fn syn(mut self) -> Self {
        self.syn = true;
        self
    }

    pub(crate) fn ack(mut self, ack: u32) -> Self {
        self.ack = Some(ack);
        self
    }

    pub(crate) fn fin(mut self) -> Self {
        self.fin = true;
        self
    }

    pub(crate) fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Flips one bit of the checksum field after it is computed.
    pub(crate) fn corrupt_checksum(mut self) -> Self {
        self.corrupt = true;
        self
    }

    pub(crate) fn header(&self) -> TcpHeader {
        let mut tcph = TcpHeader::new(self.src_port, self.dst_port, self.seq, 64240);

        if self.syn {
            tcph.set_syn();
        }

        if let Some(ack) = self.ack {
            tcph.set_ack();
            tcph.set_ack_number(ack);
        }

        if self.fin {
            tcph.set_fin();
        }

        tcph.set_checksum(PEER_ADDR, LOCAL_ADDR, &self.payload);
        tcph
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut raw = TcpSegment::new(self.header(), &self.payload)
            .to_be_bytes()
            .unwrap();

        if self.corrupt {
            raw[17] ^= 0x01;
        }

        raw
    }
}
