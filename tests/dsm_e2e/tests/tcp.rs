// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSM end-to-end tests over loopback TCP
//! TESTS: read/write coherence through real sockets, stalled copy holder, per-page gate

use std::time::{Duration, Instant};

use dsm::{AccessRight, Error, GateMode, NodeId, Outcome, PageNum};
use dsm_e2e::ClusterBuilder;

const SETTLE: Duration = Duration::from_secs(10);
const P1: PageNum = PageNum(1);

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn read_then_write_over_tcp() {
    init_logs();
    let cluster = ClusterBuilder::new()
        .node(1)
        .node(2)
        .node(3)
        .page(1, 1, "Hello")
        .start()
        .expect("cluster starts");

    let (a, b, c) = (cluster.node(1), cluster.node(2), cluster.node(3));
    assert_eq!(b.read(P1), Ok(Outcome::Requested));
    b.wait_settled(SETTLE).expect("read settles");
    assert_eq!(b.read(P1), Ok(Outcome::Local("Hello".into())));
    assert_eq!(a.access(P1), AccessRight::Read);

    let ledger = cluster.remote_ledger().expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].owner, NodeId(1));
    assert!(ledger[0].copy_set.contains(&NodeId(2)));

    assert_eq!(c.write(P1, "x"), Ok(Outcome::Requested));
    c.wait_settled(SETTLE).expect("write settles");
    assert_eq!(a.access(P1), AccessRight::None);
    assert_eq!(b.access(P1), AccessRight::None);
    assert_eq!(c.write(P1, "y"), Ok(Outcome::Local("xy".into())));

    let pages = cluster.remote_pages(3).expect("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].content, "xy");
    assert_eq!(pages[0].access, AccessRight::Write);
    let record = cluster.remote_ledger().expect("ledger").remove(0);
    assert_eq!(record.owner, NodeId(3));
    assert!(record.copy_set.is_empty());
}

#[test]
fn unknown_page_over_tcp() {
    init_logs();
    let cluster = ClusterBuilder::new().node(1).page(1, 1, "Hello").start().expect("cluster");
    assert_eq!(cluster.node(1).read(PageNum(5)), Err(Error::PageNotFound(PageNum(5))));
    assert!(cluster.manager().pending().is_empty());
}

#[test]
fn stalled_copy_holder_delays_but_does_not_block_writer() {
    init_logs();
    let timeout = Duration::from_millis(200);
    let cluster = ClusterBuilder::new()
        .timeout(timeout)
        .node(1)
        .node(2)
        .node(3)
        .page(1, 1, "Hello")
        .stall_at_manager(2)
        .start()
        .expect("cluster starts");

    let (b, c) = (cluster.node(2), cluster.node(3));
    assert_eq!(b.read(P1), Ok(Outcome::Requested));
    b.wait_settled(SETTLE).expect("read settles");

    let started = Instant::now();
    assert_eq!(c.write(P1, "x"), Ok(Outcome::Requested));
    c.wait_settled(SETTLE).expect("write settles despite stalled reader");
    assert!(started.elapsed() >= timeout);

    let stats = cluster.manager().stats();
    assert_eq!(stats.invalidation_failures, 1);
    assert_eq!(stats.writes_completed, 1);
    assert_eq!(cluster.manager().record(P1).expect("record").owner, NodeId(3));
    // Never reached by the invalidation.
    assert_eq!(b.access(P1), AccessRight::Read);
}

#[test]
fn per_page_gate_over_tcp() {
    init_logs();
    let cluster = ClusterBuilder::new()
        .gate(GateMode::PerPage)
        .node(1)
        .node(2)
        .page(1, 1, "one")
        .page(2, 2, "two")
        .start()
        .expect("cluster starts");

    let (a, b) = (cluster.node(1), cluster.node(2));
    assert_eq!(a.read(PageNum(2)), Ok(Outcome::Requested));
    assert_eq!(b.read(P1), Ok(Outcome::Requested));
    a.wait_settled(SETTLE).expect("page 2 settles");
    b.wait_settled(SETTLE).expect("page 1 settles");
    assert_eq!(a.cached(PageNum(2)).as_deref(), Some("two"));
    assert_eq!(b.cached(P1).as_deref(), Some("one"));
    assert_eq!(cluster.manager().stats().reads_completed, 2);
}
