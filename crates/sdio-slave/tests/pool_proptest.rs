//! Random list traffic never loses or duplicates a node
#![allow(clippy::expect_used)]
#![allow(clippy::arithmetic_side_effects)]

use proptest::prelude::*;
use sdio_slave::channel::{ChannelKey, ChannelRegistry};
use sdio_slave::pool::{NodeChain, NodeId, Owner};
use sdio_slave::{ChannelId, Direction, SdioError};

const NODES: usize = 16;
const COUNT: usize = 6;

#[derive(Debug, Clone, Copy)]
enum Op {
    PopFree,
    PushFree,
    PushOngoing,
    PopOngoing,
    PushFinish,
    PopFinish,
    Detach,
    PushFreeChain(usize),
    PushOngoingChain(usize),
    PushFinishChain(usize),
    RegisterCallback,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::PopFree),
        Just(Op::PushFree),
        Just(Op::PushOngoing),
        Just(Op::PopOngoing),
        Just(Op::PushFinish),
        Just(Op::PopFinish),
        Just(Op::Detach),
        (2usize..=4).prop_map(Op::PushFreeChain),
        (2usize..=4).prop_map(Op::PushOngoingChain),
        (2usize..=4).prop_map(Op::PushFinishChain),
        Just(Op::RegisterCallback),
    ]
}

fn ignore(_: ChannelId, _: NodeChain) {}

/// Link the `n` most recently held nodes, in order, into one chain.
fn take_chain(
    reg: &mut ChannelRegistry<NODES, 64>,
    held: &mut Vec<NodeId>,
    n: usize,
) -> Option<NodeChain> {
    let n = n.min(held.len());
    if n == 0 {
        return None;
    }
    let ids: Vec<_> = held.split_off(held.len() - n);
    Some(reg.arena_mut().link(&ids).expect("link held nodes"))
}

/// Walk a detached chain and return its nodes, checking count and tail.
fn walk(reg: &ChannelRegistry<NODES, 64>, chain: NodeChain) -> Vec<NodeId> {
    let mut out = vec![chain.head];
    while out.len() < chain.count {
        let next = reg.arena().next(*out.last().expect("non-empty")).expect("linked");
        out.push(next);
    }
    assert_eq!(out.last().copied(), Some(chain.tail));
    assert_eq!(reg.arena().next(chain.tail), None);
    out
}

fn key() -> ChannelKey {
    ChannelKey::new(ChannelId::new(1).expect("id"), Direction::Rx)
}

proptest! {
    #[test]
    fn prop_lists_account_for_every_node(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut reg: ChannelRegistry<NODES, 64> = ChannelRegistry::new();
        let key = key();
        reg.init_channel(key, COUNT, 32).expect("init");
        let mut held = Vec::new();
        let mut with_callback = false;

        for op in ops {
            match op {
                Op::PopFree => match reg.pop_free_node(key) {
                    Ok((id, cap)) => {
                        prop_assert_eq!(cap, 32);
                        held.push(id);
                    }
                    Err(e) => prop_assert_eq!(e, SdioError::NoBuffer),
                },
                Op::PushFree => {
                    if let Some(id) = held.pop() {
                        reg.push_free_list(key, NodeChain::single(id)).expect("free");
                    }
                }
                Op::PushOngoing => {
                    if let Some(id) = held.pop() {
                        reg.push_ongoing_node(key, id).expect("ongoing");
                    }
                }
                Op::PopOngoing => {
                    if let Ok(id) = reg.pop_ongoing_node(key, Owner::Caller) {
                        held.push(id);
                    }
                }
                Op::PushFinish => {
                    if let Some(id) = held.pop() {
                        reg.push_finish_list(key, NodeChain::single(id)).expect("finish");
                    }
                }
                Op::PopFinish => {
                    if let Ok(id) = reg.pop_finish_node(key) {
                        held.push(id);
                    }
                }
                Op::Detach => {
                    let finished = reg.finish_count(key);
                    match reg.detach_finish(key) {
                        Some((_, chain)) => {
                            prop_assert!(with_callback);
                            prop_assert_eq!(chain.count, finished);
                            let ids = walk(&reg, chain);
                            for &id in &ids {
                                prop_assert_eq!(reg.arena().owner(id), Some(Owner::Caller));
                            }
                            held.extend(ids);
                        }
                        // Without a callback nothing is detached.
                        None => prop_assert!(!with_callback || finished == 0),
                    }
                }
                Op::PushFreeChain(n) => {
                    if let Some(chain) = take_chain(&mut reg, &mut held, n) {
                        reg.push_free_list(key, chain).expect("free chain");
                    }
                }
                Op::PushOngoingChain(n) => {
                    if let Some(chain) = take_chain(&mut reg, &mut held, n) {
                        reg.push_ongoing_list(key, chain).expect("ongoing chain");
                    }
                }
                Op::PushFinishChain(n) => {
                    if let Some(chain) = take_chain(&mut reg, &mut held, n) {
                        reg.push_finish_list(key, chain).expect("finish chain");
                    }
                }
                Op::RegisterCallback => {
                    reg.register_callback(key, &ignore).expect("callback");
                    with_callback = true;
                }
            }

            prop_assert!(reg.verify(key));
            let listed = reg.free_count(key) + reg.ongoing_count(key) + reg.finish_count(key);
            prop_assert_eq!(listed + held.len(), COUNT);
            for &id in &held {
                prop_assert_eq!(reg.arena().owner(id), Some(Owner::Caller));
            }
            prop_assert_eq!(reg.arena().unclaimed(), NODES - COUNT);
        }

        for id in held.drain(..) {
            reg.push_free_list(key, NodeChain::single(id)).expect("return");
        }
        reg.deinit_channel(key).expect("deinit");
        prop_assert_eq!(reg.arena().unclaimed(), NODES);
    }
}
