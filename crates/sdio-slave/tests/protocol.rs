//! Command handling, state recovery and lifecycle
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::cast_possible_truncation)]

mod common;

use common::{build_packet, ch, parse_frame, recorder, Host, Record};
use embassy_futures::block_on;
use platform::mocks::MockPin;
use platform::PinState;
use sdio_slave::command::{Cmd53, HostOp, CMD52, CMD53};
use sdio_slave::config::EVENT_QUEUE_DEPTH;
use sdio_slave::{
    BusState, Direction, DriverConfig, HandshakeConfig, SdioError, WakeHandshake,
};

fn with_tx(count: usize) -> Host {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Tx, count, 256)
        .expect("tx init");
    host
}

fn queue(host: &Host, byte: u8) {
    let chain = host.tx_node(0, 0, &[byte; 16]);
    block_on(host.slave.submit_write(ch(0), chain, None)).expect("submit");
}

// ---- command decoding ----

#[test]
fn test_unknown_command_is_counted_and_rearmed() {
    let host = Host::new(DriverConfig::default());
    let armed = host.bus.arm_count();
    host.command(5, 0);
    host.settle();
    assert_eq!(host.slave.stats().unknown_commands, 1);
    assert_eq!(host.bus.arm_count(), armed + 1);
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);
}

#[test]
fn test_cmd52_only_rearms() {
    let host = Host::new(DriverConfig::default());
    let armed = host.bus.arm_count();
    host.command(CMD52, 0x1234);
    assert_eq!(host.slave.poll(), 0);
    assert_eq!(host.bus.arm_count(), armed + 1);
    assert_eq!(host.slave.stats(), sdio_slave::DriverStats::default());
}

#[test]
fn test_open_ended_block_transfer_is_refused() {
    let host = Host::new(DriverConfig::default());
    host.ready_rx(0, 1, 512);
    host.command(CMD53, Cmd53::new(HostOp::Write, 1, true, 0, 0).0);
    assert_eq!(host.slave.poll(), 0);
    assert_eq!(host.slave.stats().rejected_commands, 1);
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);

    // The link still works afterwards.
    host.host_write(&build_packet(&[Record::new(0, 1, &[7; 12])]));
    assert_eq!(host.take_rx(0), vec![Record::new(0, 1, &[7; 12])]);
}

#[test]
fn test_byte_mode_write_is_received() {
    let host = Host::new(DriverConfig::default());
    host.ready_rx(1, 1, 64);
    let packet = build_packet(&[Record::new(1, 3, &[0x42; 20])]);
    // 4-byte header, 20 bytes of data, end word.
    host.bus.host_write(&packet[..28]);
    host.command(CMD53, Cmd53::new(HostOp::Write, 1, false, 0, 28).0);
    host.settle();
    assert_eq!(host.take_rx(1), vec![Record::new(1, 3, &[0x42; 20])]);
    assert_eq!(host.slave.stats().desyncs, 0);
}

// ---- overload and desync ----

#[test]
fn test_full_event_queue_drops_and_counts() {
    let host = Host::new(DriverConfig::default());
    for _ in 0..=EVENT_QUEUE_DEPTH {
        host.command(CMD53, Cmd53::new(HostOp::Read, 1, true, 0, 1).0);
    }
    assert_eq!(host.slave.stats().dropped_events, 1);
    assert_eq!(host.slave.poll(), EVENT_QUEUE_DEPTH);
}

#[test]
fn test_tx_burst_does_not_starve_host_write() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Tx, EVENT_QUEUE_DEPTH + 4, 32)
        .expect("tx init");
    host.ready_rx(1, 1, 64);
    // More TX requests than the interrupt queue holds, none processed yet.
    for i in 0..EVENT_QUEUE_DEPTH + 4 {
        let chain = host.tx_node(0, 0, &[i as u8; 8]);
        host.slave
            .push_ongoing_node(ch(0), Direction::Tx, chain.head)
            .expect("queue tx");
    }
    host.host_write(&build_packet(&[Record::new(1, 2, &[0x5C; 20])]));

    assert_eq!(host.take_rx(1), vec![Record::new(1, 2, &[0x5C; 20])]);
    assert_eq!(host.slave.stats().dropped_events, 0);
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);
    // The burst itself was framed in one go.
    let frame = host.host_read().expect("frame");
    assert_eq!(parse_frame(&frame).len(), EVENT_QUEUE_DEPTH + 4);
}

#[test]
fn test_dropped_host_write_is_rearmed_and_counted() {
    let host = Host::new(DriverConfig::default());
    host.ready_rx(0, 1, 64);
    for _ in 0..EVENT_QUEUE_DEPTH {
        host.command(CMD53, Cmd53::new(HostOp::Read, 1, true, 0, 1).0);
    }
    let armed = host.bus.arm_count();
    host.command(CMD53, Cmd53::new(HostOp::Write, 1, true, 0, 1).0);
    assert_eq!(host.slave.stats().dropped_events, 1);
    assert_eq!(host.slave.stats().desyncs, 1);
    assert_eq!(host.bus.arm_count(), armed + 1);
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);

    // Once the queue drains, the host's retry goes through.
    host.settle();
    host.host_write(&build_packet(&[Record::new(0, 0, &[9; 12])]));
    assert_eq!(host.take_rx(0), vec![Record::new(0, 0, &[9; 12])]);
}

#[test]
fn test_block_count_mismatch_counts_desync_and_completes() {
    let host = with_tx(2);
    queue(&host, 1);
    host.settle();
    assert_eq!(host.bus.tx_length_blocks(), 1);

    let bytes = host.host_read_blocks(2);
    assert_eq!(host.slave.stats().desyncs, 1);
    assert_eq!(parse_frame(&bytes).len(), 1);
    assert_eq!(host.slave.stats().tx_packets, 1);
    assert_eq!(host.slave.tx_credits(ch(0)), 2);
}

#[test]
fn test_read_with_nothing_staged_is_a_desync() {
    let host = Host::new(DriverConfig::default());
    let bytes = host.host_read_blocks(1);
    assert!(bytes.is_empty());
    assert_eq!(host.slave.stats().desyncs, 1);
    assert_eq!(host.slave.state(Direction::Tx), BusState::CmdWait);
}

#[test]
fn test_busy_controller_aborts_and_readvertises() {
    let host = with_tx(2);
    queue(&host, 4);
    host.settle();

    host.bus.set_busy(true);
    let bytes = host.host_read_blocks(1);
    assert!(bytes.is_empty());
    assert_eq!(host.slave.stats().hw_timeouts, 1);
    assert_eq!(host.bus.tx_length_blocks(), 1);

    host.bus.set_busy(false);
    let frame = host.host_read().expect("frame offered again");
    assert_eq!(parse_frame(&frame)[0].data, vec![4; 16]);
}

#[test]
fn test_stalled_fifo_on_busy_rx_is_timeout() {
    let host = Host::new(DriverConfig::default());
    host.ready_rx(0, 1, 64);
    host.bus.set_busy(true);
    host.host_write(&build_packet(&[Record::new(0, 0, &[1; 4])]));
    assert_eq!(host.slave.stats().hw_timeouts, 1);
    assert!(host.take_rx(0).is_empty());
    // The buffer is still queued for the next write.
    assert_eq!(host.slave.list_counts(ch(0), Direction::Rx), Ok((0, 1, 0)));
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);
}

// ---- reset and lifecycle ----

#[test]
fn test_reset_mid_read_restores_everything() {
    let host = with_tx(2);
    let (cb, seen) = recorder();
    host.slave
        .register_callback(ch(0), Direction::Tx, cb)
        .expect("callback");
    queue(&host, 8);
    host.settle();
    host.command(CMD53, Cmd53::new(HostOp::Read, 1, true, 0, 1).0);
    host.settle();
    assert_eq!(host.slave.state(Direction::Tx), BusState::TxActive);
    assert_eq!(host.slave.tx_credits(ch(0)), 1);

    host.slave.reset().expect("reset");
    assert_eq!(host.slave.state(Direction::Tx), BusState::CmdWait);
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);
    assert_eq!(host.slave.tx_credits(ch(0)), 2);
    assert_eq!(seen.lock().expect("lock").len(), 1);
    assert_eq!(host.bus.tx_length_blocks(), 0);
    assert!(host.host_read().is_none());
}

#[test]
fn test_low_power_holds_announcements() {
    let host = with_tx(2);
    host.slave.enter_low_power().expect("sleep");
    assert_eq!(host.slave.state(Direction::Tx), BusState::Idle);
    assert_eq!(host.slave.enter_low_power(), Err(SdioError::NotInitialized));

    queue(&host, 3);
    host.settle();
    assert_eq!(host.bus.tx_length_blocks(), 0);

    host.slave.exit_low_power().expect("wake");
    assert_eq!(host.slave.state(Direction::Tx), BusState::CmdWait);
    assert_eq!(host.bus.tx_length_blocks(), 1);
    let frame = host.host_read().expect("frame");
    assert_eq!(parse_frame(&frame)[0].data, vec![3; 16]);
}

#[test]
fn test_init_deinit_cycle() {
    let host = Host::new(DriverConfig::default());
    assert_eq!(host.slave.init(), Err(SdioError::AlreadyInitialized));
    host.slave.deinit().expect("deinit");
    assert_eq!(host.slave.deinit(), Err(SdioError::NotInitialized));
    assert_eq!(host.slave.state(Direction::Rx), BusState::Idle);
    host.slave.init().expect("re-init");
    assert_eq!(host.slave.state(Direction::Rx), BusState::CmdWait);
}

// ---- handshake lines ----

#[test]
fn test_wake_line_follows_pending_tx() {
    let wake = MockPin::new(false);
    let forbid = MockPin::new(false);
    let handshake = WakeHandshake::new(wake.clone(), forbid, HandshakeConfig::default())
        .expect("handshake");
    let host = Host::with_notifier(DriverConfig::default(), handshake);
    host.slave
        .init_channel(ch(0), Direction::Tx, 2, 64)
        .expect("tx init");
    assert!(!wake.level());

    let chain = host.tx_node(0, 0, &[6; 4]);
    block_on(host.slave.submit_write(ch(0), chain, None)).expect("submit");
    host.settle();
    assert!(wake.level());

    host.host_read().expect("frame");
    assert!(!wake.level());
    assert_eq!(
        host.slave.notifier(|n| n.config().wakeup_level),
        PinState::High
    );
}
