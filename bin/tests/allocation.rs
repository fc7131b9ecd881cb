mod common;

use anyhow::Result;
use common::builder::*;
use config::ClusterConfig;
use duet_bin::Cluster;
use duet_core::{
    bytes::Bytes,
    metrics,
    msg::{Envelope, Message, NodeId, Request},
};
use failover_coordination::FailoverState;
use tracing_test::traced_test;

static EXAMPLE: &str = include_str!("../../example.yaml");

fn addr(s: &str) -> std::net::Ipv6Addr {
    s.parse().unwrap()
}

#[test]
#[traced_test]
/// runs the sample cluster end to end: every device is configured by the
/// primary before it fails, the backup holds the replicated state and takes over
fn example_cluster_run() -> Result<()> {
    let cfg = ClusterConfig::parse_str(EXAMPLE)?;
    let mut cluster = Cluster::build(&cfg)?;
    cluster.run();
    let report = cluster.report();
    assert_eq!(report.now_ms, 12_000);
    assert_eq!(report.completed(), 7);

    let expected = [
        ("core-router", "2001:db8:f::1"),
        ("file-server", "2001:db8:f::2"),
        ("ceo-laptop", "2001:db8:f::3"),
        ("desk-pc-1", "2001:db8:1::1"),
        ("desk-pc-2", "2001:db8:1::2"),
        ("phone-1", "2001:db8:2::1"),
        ("lobby-printer", "2001:db8:3::1"),
    ];
    for (name, ip) in expected {
        let dev = report.device(name).unwrap();
        assert_eq!(dev.address, Some(addr(ip)), "{name}");
        assert_eq!(dev.server_name.as_deref(), Some(PRIMARY), "{name}");
        assert_eq!(dev.stats.solicits_sent, 1, "{name}");
        assert_eq!(dev.stats.replies_received, 1, "{name}");
    }

    let primary = report.node(PRIMARY).unwrap();
    assert_eq!(primary.state, FailoverState::Failed);
    assert_eq!(primary.counters.solicits_seen, 7);
    assert_eq!(primary.counters.requests_seen, 7);
    assert_eq!(primary.advertises_sent, 7);
    assert_eq!(primary.replies_sent, 7);
    assert_eq!(primary.active_leases, 7);
    assert!(primary.mean_response_ms.is_some());

    let backup = report.node(BACKUP).unwrap();
    assert_eq!(backup.state, FailoverState::Active);
    // standby: every SOLICIT discarded, everything addressed to others ignored
    assert_eq!(backup.counters.dropped_inactive, 7);
    assert_eq!(backup.counters.dropped_misrouted, 21);
    assert_eq!(backup.counters.solicits_seen, 0);
    assert_eq!(backup.syncs_applied, 4);
    assert_eq!(backup.active_leases, 7);
    assert_eq!(backup.pool_counters.vip, 4);
    assert_eq!(backup.pool_counters.pc, 3);
    assert_eq!(backup.pool_counters.mobile, 2);
    assert_eq!(backup.pool_counters.printer, 2);

    assert!(logs_contain("partner timed out, promoting to active"));
    let json = report.to_json()?;
    assert!(json.contains("\"state\": \"FAILED\""));
    Ok(())
}

#[test]
fn vip_cutoff_and_fast_delay() -> Result<()> {
    let mut cluster = ClusterSettings {
        cutoff: 9,
        backup: false,
        spacing_ms: 0,
        devices: vec![("boss-pc", "pc", 9, false), ("intern-pc", "pc", 8, false)],
        ..Default::default()
    }
    .build()?;
    cluster.run_until(ms(1_000));

    let boss = cluster.device("boss-pc").unwrap();
    assert_eq!(boss.address(), Some(addr("2001:db8:f::1")));
    // solicit 1ms, advertise 10+1ms, request 1ms, reply 10+1ms
    assert_eq!(boss.completed_at(), Some(ms(24)));

    let intern = cluster.device("intern-pc").unwrap();
    assert_eq!(intern.address(), Some(addr("2001:db8:1::1")));
    assert!(intern.completed_at().unwrap() > ms(100));
    Ok(())
}

#[test]
fn simultaneous_solicits_served_by_priority() -> Result<()> {
    let mut cluster = ClusterSettings {
        backup: false,
        spacing_ms: 0,
        devices: vec![
            ("pc-low", "pc", 1, false),
            ("pc-mid", "pc", 5, false),
            ("pc-high", "pc", 7, false),
        ],
        ..Default::default()
    }
    .build()?;
    cluster.run_until(ms(1_000));

    // pc-low arrives first to an idle queue; the other two wait for the drain
    // step and go by priority
    let order = ["pc-low", "pc-high", "pc-mid"];
    for (i, name) in order.iter().enumerate() {
        let dev = cluster.device(name).unwrap();
        assert_eq!(
            dev.address(),
            Some(addr(&format!("2001:db8:1::{}", i + 1))),
            "{name}"
        );
    }
    let node = cluster.server(PRIMARY).unwrap();
    assert_eq!(node.leases().pool().counters().pc, 4);
    Ok(())
}

#[test]
#[traced_test]
fn malformed_input_is_dropped() -> Result<()> {
    let mut cluster = ClusterSettings {
        backup: false,
        ..Default::default()
    }
    .build()?;
    let primary = cluster.server_id(PRIMARY).unwrap();
    let stranger = NodeId(50);
    let unknown_before = metrics::RECV_TYPE_COUNT.unknown.get();

    cluster.world_mut().post(
        Envelope::new(stranger, Some(primary), Bytes::from_static(b"{\"kind\":\"BOGUS\"}")),
        ms(1),
    );
    let outside = Message::Request(Request {
        offered_address: addr("fd00::5"),
        priority: 1,
    });
    cluster
        .world_mut()
        .post(Envelope::from_msg(stranger, Some(primary), &outside)?, ms(2));
    // addressed elsewhere
    cluster
        .world_mut()
        .post(Envelope::from_msg(stranger, Some(NodeId(77)), &outside)?, ms(3));
    cluster.run_until(ms(100));

    let node = cluster.server(PRIMARY).unwrap();
    let counters = node.counters();
    assert_eq!(counters.dropped_malformed, 2);
    assert_eq!(counters.dropped_misrouted, 1);
    // rejected events are not counted as seen
    assert_eq!(counters.requests_seen, 0);
    assert!(node.leases().table().is_empty());
    assert!(metrics::RECV_TYPE_COUNT.unknown.get() > unknown_before);
    assert!(logs_contain("dropping malformed input"));
    Ok(())
}

#[test]
fn expired_leases_are_purged() -> Result<()> {
    let mut cluster = ClusterSettings {
        backup: false,
        lease_expiry: true,
        lease_vip: "4",
        lease_normal: "2",
        sweep: 1,
        spacing_ms: 0,
        devices: vec![("laptop", "pc", 1, false)],
        ..Default::default()
    }
    .build()?;
    cluster.run_until(ms(1_500));
    let node = cluster.server(PRIMARY).unwrap();
    assert_eq!(node.leases().table().len(), 1);

    cluster.run_until(ms(3_500));
    let node = cluster.server(PRIMARY).unwrap();
    assert!(node.leases().table().is_empty());
    assert_eq!(node.counters().leases_expired, 1);
    // no reuse: the pool keeps counting
    assert_eq!(node.leases().pool().counters().pc, 2);
    Ok(())
}

#[test]
fn renewing_device_keeps_its_lease() -> Result<()> {
    let mut cluster = ClusterSettings {
        backup: false,
        lease_expiry: true,
        lease_vip: "4",
        lease_normal: "2",
        sweep: 1,
        spacing_ms: 0,
        devices: vec![("laptop", "pc", 1, true)],
        ..Default::default()
    }
    .build()?;
    cluster.run_until(ms(5_000));

    let node = cluster.server(PRIMARY).unwrap();
    assert_eq!(node.leases().table().len(), 1);
    assert_eq!(node.counters().leases_expired, 0);
    assert!(node.counters().renews_seen >= 3);

    let dev = cluster.device("laptop").unwrap();
    assert!(dev.stats().renews_sent >= 3);
    assert_eq!(dev.stats().solicits_sent, 1);
    assert_eq!(dev.address(), Some(addr("2001:db8:1::1")));
    Ok(())
}
