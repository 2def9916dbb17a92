//! Loop-back harness: plays the SDIO host against the mocks.
#![allow(dead_code)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::{Arc, Mutex};

use platform::mocks::{MockBus, MockDma};
use sdio_slave::command::{Cmd53, HostOp, CMD53};
use sdio_slave::config::BLOCK_SIZE;
use sdio_slave::wire::{self, HeaderWord, PayloadHeader, PAYLOAD_HEADER_LEN};
use sdio_slave::{ChannelCallback, ChannelId, Direction, DriverConfig, NodeChain, NodeId, SdioSlave};

pub const NODES: usize = 32;
pub const NODE_BYTES: usize = 1024;

pub type Slave<N = ()> = SdioSlave<MockBus, MockDma, N, NODES, NODE_BYTES>;

pub fn ch(id: u8) -> ChannelId {
    ChannelId::new(id).expect("valid channel id")
}

/// A decoded payload record as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub channel: u8,
    pub subtype: u8,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(channel: u8, subtype: u8, data: &[u8]) -> Self {
        Self {
            channel,
            subtype,
            data: data.to_vec(),
        }
    }
}

/// Encode records into a host → device packet, end word included, padded to
/// whole blocks.
pub fn build_packet(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for r in records {
        let header = PayloadHeader {
            len: r.data.len() as u16,
            channel: r.channel,
            subtype: r.subtype,
        };
        out.extend_from_slice(&header.pack());
        out.extend_from_slice(&r.data);
        out.resize(wire::align4(out.len()), 0);
    }
    out.extend_from_slice(&wire::end_word());
    let padded = out.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    out.resize(padded, 0);
    out
}

/// Decode a device → host frame.
pub fn parse_frame(frame: &[u8]) -> Vec<Record> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos + PAYLOAD_HEADER_LEN <= frame.len() {
        match wire::unpack(&frame[pos..]) {
            Some(HeaderWord::Payload(h)) => {
                let start = pos + PAYLOAD_HEADER_LEN;
                let end = start + usize::from(h.len);
                records.push(Record::new(h.channel, h.subtype, &frame[start..end]));
                pos = start + wire::align4(usize::from(h.len));
            }
            _ => break,
        }
    }
    records
}

/// Callback that records every notification it receives.
pub fn recorder() -> (ChannelCallback, Arc<Mutex<Vec<(ChannelId, NodeChain)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb: ChannelCallback = Box::leak(Box::new(move |id: ChannelId, chain: NodeChain| {
        sink.lock().expect("recorder lock").push((id, chain));
    }));
    (cb, seen)
}

/// Engine plus the host end of its mocks.
pub struct Host<N: sdio_slave::HostNotifier = ()> {
    pub bus: MockBus,
    pub tx_dma: MockDma,
    pub rx_dma: MockDma,
    pub slave: Box<Slave<N>>,
}

impl Host<()> {
    pub fn new(config: DriverConfig) -> Self {
        Self::with_notifier(config, ())
    }
}

impl<N: sdio_slave::HostNotifier> Host<N> {
    pub fn with_notifier(config: DriverConfig, notifier: N) -> Self {
        let bus = MockBus::new();
        let tx_dma = MockDma::new(&bus);
        let rx_dma = MockDma::new(&bus);
        let slave = Box::new(SdioSlave::new(
            bus.clone(),
            tx_dma.clone(),
            rx_dma.clone(),
            notifier,
            config,
        ));
        slave.init().expect("init");
        Self {
            bus,
            tx_dma,
            rx_dma,
            slave,
        }
    }

    /// Run the worker until nothing is left, delivering RX DMA completions.
    pub fn settle(&self) {
        loop {
            self.slave.poll();
            if self.rx_dma.take_completion() {
                self.slave.on_dma_interrupt(Direction::Rx);
            } else {
                break;
            }
        }
    }

    /// Latch a command and run its interrupt.
    pub fn command(&self, index: u8, argument: u32) {
        self.bus.latch_command(index, argument);
        self.slave.on_bus_interrupt();
    }

    /// Host writes `packet` (already block padded) in block mode.
    pub fn host_write(&self, packet: &[u8]) {
        let blocks = packet.len().div_ceil(BLOCK_SIZE);
        self.bus.host_write(packet);
        self.command(CMD53, Cmd53::new(HostOp::Write, 1, true, 0, blocks as u16).0);
        self.settle();
    }

    /// Host reads whatever the device advertises. `None` if nothing is.
    pub fn host_read(&self) -> Option<Vec<u8>> {
        self.settle();
        let blocks = self.bus.tx_length_blocks();
        if blocks == 0 {
            return None;
        }
        Some(self.host_read_blocks(blocks as u16))
    }

    /// Host reads exactly `blocks`, whatever was advertised.
    pub fn host_read_blocks(&self, blocks: u16) -> Vec<u8> {
        self.command(CMD53, Cmd53::new(HostOp::Read, 1, true, 0, blocks).0);
        self.settle();
        for _ in 0..blocks {
            self.bus.raise_write_end();
            self.slave.on_bus_interrupt();
        }
        self.settle();
        self.bus.take_host_bytes()
    }

    /// Initialise an RX channel and queue all of its buffers.
    pub fn ready_rx(&self, id: u8, count: usize, size: usize) {
        let c = ch(id);
        self.slave
            .init_channel(c, Direction::Rx, count, size)
            .expect("init rx");
        for _ in 0..count {
            let (node, _) = self.slave.pop_free_node(c, Direction::Rx).expect("free");
            self.slave
                .push_ongoing_node(c, Direction::Rx, node)
                .expect("queue rx");
        }
    }

    /// Drain an RX channel's finish list as records.
    pub fn take_rx(&self, id: u8) -> Vec<Record> {
        let c = ch(id);
        let mut out = Vec::new();
        while let Ok(node) = self.slave.pop_finish_node(c, Direction::Rx) {
            out.push(self.record_of(id, node));
        }
        out
    }

    pub fn record_of(&self, id: u8, node: NodeId) -> Record {
        let mut buf = vec![0u8; NODE_BYTES];
        let n = self.slave.read_node(node, &mut buf).expect("read node");
        let (_, subtype) = self.slave.node_len(node).expect("node len");
        Record::new(id, subtype, &buf[..n])
    }

    /// Fill a free TX node with `data`, returning it as a one-node chain.
    pub fn tx_node(&self, id: u8, subtype: u8, data: &[u8]) -> NodeChain {
        let (node, _) = self
            .slave
            .pop_free_node(ch(id), Direction::Tx)
            .expect("free tx node");
        self.slave.fill_node(node, subtype, data).expect("fill");
        NodeChain::single(node)
    }
}
