//! Channel lifecycle and list operations through the public driver API
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use common::{ch, parse_frame, recorder, Host, Record, NODES};
use sdio_slave::{ChannelId, Direction, DriverConfig, SdioError};

// ---- init / deinit ----

#[test]
fn test_scenario_a_fifth_pop_is_no_buffer() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Rx, 4, 512)
        .expect("init");
    for _ in 0..4 {
        let (_, capacity) = host
            .slave
            .pop_free_node(ch(0), Direction::Rx)
            .expect("pop");
        assert_eq!(capacity, 512);
    }
    assert_eq!(
        host.slave.pop_free_node(ch(0), Direction::Rx),
        Err(SdioError::NoBuffer)
    );
}

#[test]
fn test_scenario_b_ongoing_is_fifo() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(1), Direction::Rx, 3, 64)
        .expect("init");
    let nodes: Vec<_> = (0..3)
        .map(|_| host.slave.pop_free_node(ch(1), Direction::Rx).expect("pop").0)
        .collect();
    for &n in &nodes {
        host.slave
            .push_ongoing_node(ch(1), Direction::Rx, n)
            .expect("push");
    }
    for &n in &nodes {
        assert_eq!(host.slave.pop_ongoing_node(ch(1), Direction::Rx), Ok(n));
    }
}

#[test]
fn test_double_deinit_reports_not_initialized() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(2), Direction::Tx, 2, 128)
        .expect("init");
    assert_eq!(host.slave.deinit_channel(ch(2), Direction::Tx), Ok(()));
    assert_eq!(
        host.slave.deinit_channel(ch(2), Direction::Tx),
        Err(SdioError::NotInitialized)
    );
    assert_eq!(host.slave.tx_credits(ch(2)), 0);
}

#[test]
fn test_init_twice_is_rejected() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Tx, 1, 64)
        .expect("init");
    assert_eq!(
        host.slave.init_channel(ch(0), Direction::Tx, 1, 64),
        Err(SdioError::AlreadyInitialized)
    );
}

#[test]
fn test_pool_exhaustion_is_no_memory() {
    let host = Host::new(DriverConfig::default());
    assert_eq!(
        host.slave.init_channel(ch(0), Direction::Rx, NODES + 1, 64),
        Err(SdioError::NoMemory)
    );
    // Nothing was claimed by the failed attempt.
    host.slave
        .init_channel(ch(0), Direction::Rx, NODES, 64)
        .expect("full pool");
}

#[test]
fn test_deinit_returns_pool_to_arena() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Rx, NODES, 64)
        .expect("init");
    assert_eq!(host.slave.claim_node(64), Err(SdioError::NoMemory));
    host.slave
        .deinit_channel(ch(0), Direction::Rx)
        .expect("deinit");
    host.slave.claim_node(64).expect("node available again");
}

#[test]
fn test_invalid_channel_id_is_parameter_error() {
    assert_eq!(ChannelId::new(4), Err(SdioError::InvalidChannel(4)));
    assert_eq!(ChannelId::new(255), Err(SdioError::InvalidChannel(255)));
}

#[test]
fn test_operations_on_uninitialised_channel() {
    let host = Host::new(DriverConfig::default());
    assert_eq!(
        host.slave.pop_free_node(ch(3), Direction::Rx),
        Err(SdioError::NotInitialized)
    );
    assert_eq!(
        host.slave.pop_finish_node(ch(3), Direction::Tx),
        Err(SdioError::NotInitialized)
    );
}

// ---- externally supplied buffers ----

#[test]
fn test_count_zero_channel_runs_on_external_nodes() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(1), Direction::Rx, 0, 256)
        .expect("init");
    assert_eq!(
        host.slave.pop_free_node(ch(1), Direction::Rx),
        Err(SdioError::NoBuffer)
    );

    let a = host.slave.claim_node(256).expect("claim a");
    let b = host.slave.claim_node(256).expect("claim b");
    let chain = host.slave.chain(&[a, b]).expect("chain");
    host.slave
        .push_free_list(ch(1), Direction::Rx, chain)
        .expect("push free");
    assert_eq!(host.slave.list_counts(ch(1), Direction::Rx), Ok((2, 0, 0)));

    let (first, capacity) = host
        .slave
        .pop_free_node(ch(1), Direction::Rx)
        .expect("pop");
    assert_eq!((first, capacity), (a, 256));
    host.slave
        .submit_read(ch(1), sdio_slave::NodeChain::single(first))
        .expect("submit read");
    assert_eq!(host.slave.list_counts(ch(1), Direction::Rx), Ok((1, 1, 0)));

    // External nodes go back to the caller, not the arena.
    host.slave
        .deinit_channel(ch(1), Direction::Rx)
        .expect("deinit");
    host.slave.release_node(a).expect("caller owns a again");
    host.slave.release_node(b).expect("caller owns b again");
}

#[test]
fn test_node_access_requires_ownership() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Tx, 1, 16)
        .expect("init");
    let (node, _) = host
        .slave
        .pop_free_node(ch(0), Direction::Tx)
        .expect("pop");
    assert_eq!(
        host.slave.fill_node(node, 0, &[0; 17]),
        Err(SdioError::InvalidParameter)
    );
    host.slave.fill_node(node, 7, &[1, 2, 3]).expect("fill");
    assert_eq!(host.slave.node_len(node), Ok((3, 7)));
    assert_eq!(host.slave.node_capacity(node), Ok(16));

    host.slave
        .push_free_list(ch(0), Direction::Tx, sdio_slave::NodeChain::single(node))
        .expect("return");
    assert_eq!(
        host.slave.fill_node(node, 0, &[1]),
        Err(SdioError::InvalidParameter)
    );
    assert_eq!(host.slave.release_node(node), Err(SdioError::InvalidParameter));
}

// ---- finish list and notify ----

#[test]
fn test_notify_detaches_whole_finish_list() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(2), Direction::Rx, 3, 32)
        .expect("init");
    let nodes: Vec<_> = (0..3)
        .map(|_| host.slave.pop_free_node(ch(2), Direction::Rx).expect("pop").0)
        .collect();
    let chain = host.slave.chain(&nodes).expect("chain");
    host.slave
        .push_finish_list(ch(2), Direction::Rx, chain)
        .expect("finish");

    // No callback: notify is a no-op and nodes stay for pop_finish_node.
    assert!(!host.slave.notify(ch(2), Direction::Rx));
    assert_eq!(host.slave.list_counts(ch(2), Direction::Rx), Ok((0, 0, 3)));

    let (cb, seen) = recorder();
    host.slave
        .register_callback(ch(2), Direction::Rx, cb)
        .expect("callback");
    assert!(host.slave.notify(ch(2), Direction::Rx));
    assert_eq!(host.slave.list_counts(ch(2), Direction::Rx), Ok((0, 0, 0)));
    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1.count, 3);
    assert_eq!(seen[0].1.head, nodes[0]);
    assert_eq!(seen[0].1.tail, nodes[2]);
}

#[test]
fn test_chain_rejects_repeats_and_foreign_nodes() {
    let host = Host::new(DriverConfig::default());
    let a = host.slave.claim_node(8).expect("claim");
    assert_eq!(host.slave.chain(&[a, a]), Err(SdioError::InvalidParameter));
    assert_eq!(host.slave.chain(&[]), Err(SdioError::InvalidParameter));
    host.slave.release_node(a).expect("release");
    assert_eq!(host.slave.chain(&[a]), Err(SdioError::InvalidParameter));
}

// ---- TX queueing ----

#[test]
fn test_tx_push_ongoing_rejects_unfilled_node() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Tx, 2, 64)
        .expect("tx init");
    let (empty, _) = host.slave.pop_free_node(ch(0), Direction::Tx).expect("free");
    assert_eq!(
        host.slave.push_ongoing_node(ch(0), Direction::Tx, empty),
        Err(SdioError::InvalidParameter)
    );

    let filled = host.tx_node(0, 0, &[0xA7; 16]);
    host.slave
        .push_ongoing_node(ch(0), Direction::Tx, filled.head)
        .expect("queue tx");
    let frame = host.host_read().expect("frame");
    assert_eq!(parse_frame(&frame), vec![Record::new(0, 0, &[0xA7; 16])]);
    // The rejected node is still the caller's to fill.
    host.slave.fill_node(empty, 0, &[1]).expect("fill rejected node");
}
