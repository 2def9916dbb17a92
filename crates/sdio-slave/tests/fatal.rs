//! Conditions that abort instead of returning an error
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

mod common;

use common::{build_packet, ch, Host, Record};
use sdio_slave::{Direction, DriverConfig, NodeChain};

#[test]
#[should_panic(expected = "payload exceeds destination capacity")]
fn test_scenario_d_oversized_payload_aborts() {
    let host = Host::new(DriverConfig::default());
    host.ready_rx(0, 1, 64);
    host.host_write(&build_packet(&[Record::new(0, 0, &[0xEE; 100])]));
}

#[test]
#[should_panic(expected = "payload exceeds destination capacity")]
fn test_oversized_payload_aborts_on_cpu_copy_path() {
    let host = Host::new(DriverConfig::cpu_copy());
    host.ready_rx(1, 2, 32);
    host.host_write(&build_packet(&[
        Record::new(1, 0, &[1; 32]),
        Record::new(1, 0, &[2; 33]),
    ]));
}

#[test]
#[should_panic(expected = "node list corrupted")]
fn test_chain_with_wrong_count_aborts() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Rx, 2, 64)
        .expect("init");
    let a = host.slave.pop_free_node(ch(0), Direction::Rx).expect("a").0;
    let b = host.slave.pop_free_node(ch(0), Direction::Rx).expect("b").0;
    let mut chain = host.slave.chain(&[a, b]).expect("chain");
    chain.count = 3;
    let _ = host.slave.push_free_list(ch(0), Direction::Rx, chain);
}

#[test]
#[should_panic(expected = "node list corrupted")]
fn test_chain_with_wrong_tail_aborts() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(0), Direction::Rx, 3, 64)
        .expect("init");
    let ids: Vec<_> = (0..3)
        .map(|_| host.slave.pop_free_node(ch(0), Direction::Rx).expect("pop").0)
        .collect();
    let mut chain = host.slave.chain(&ids).expect("chain");
    chain.tail = ids[1];
    let _ = host.slave.push_finish_list(ch(0), Direction::Rx, chain);
}

#[test]
#[should_panic(expected = "owned by another list")]
fn test_pushing_a_queued_node_aborts() {
    let host = Host::new(DriverConfig::default());
    host.slave
        .init_channel(ch(2), Direction::Rx, 1, 64)
        .expect("init");
    let node = host.slave.pop_free_node(ch(2), Direction::Rx).expect("pop").0;
    host.slave
        .submit_read(ch(2), NodeChain::single(node))
        .expect("queued");
    // Still on the ongoing list: splicing it elsewhere would double-own it.
    let _ = host
        .slave
        .push_free_list(ch(2), Direction::Rx, NodeChain::single(node));
}
