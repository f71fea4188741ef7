//! End-to-end campaigns against the simulated probes and meter.

use std::sync::Arc;
use std::time::Duration;

use joule_profiler::campaign::{CampaignController, CampaignOptions, CampaignPhase};
use joule_profiler::control::sim::SimulatedNetwork;
use joule_profiler::descriptor::{Descriptor, ProbeRef};
use joule_profiler::meter::sim::SimulatedMeter;

const DESCRIPTOR: &str = r#"{
    "campaign": "bench",
    "probes": {
        "1": {"ip": "10.0.0.1", "receiver_control": 7777, "receiver_port": 5555},
        "ap": {"ip": "10.0.0.254", "receiver_control": 8888, "receiver_port": 6666}
    },
    "idle": {"duration_s": 0.2},
    "stints": [
        {"src": 1, "dst": "ap", "packetsize_bytes": 64, "bitrate_mbps": 0.5, "duration_s": 0.2},
        {"src": "ap", "dst": 1,
          "packetsize_bytes": 1024, "bitrate_mbps": 2.0, "duration_s": 0.2, "note": "downlink"}
    ]
}"#;

fn options() -> CampaignOptions {
    CampaignOptions {
        settle_delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_full_simulated_campaign() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("joule.json");
    std::fs::write(&path, DESCRIPTOR).unwrap();

    let descriptor = Descriptor::load(&path).unwrap();
    let net = Arc::new(SimulatedNetwork::new(0.1));
    let mut campaign =
        CampaignController::new(&path, descriptor, net.clone(), "11a", "20", 1, options()).unwrap();

    campaign
        .run(SimulatedMeter::new(5.0, 0.1, Duration::from_millis(2)))
        .await
        .unwrap();
    assert_eq!(campaign.phase(), CampaignPhase::Done);

    let result = Descriptor::load(&path).unwrap();

    let idle = result.idle.stats.as_ref().unwrap();
    assert!(idle.mean > 4.8 && idle.mean < 5.2);
    assert!(idle.ci >= 0.0);
    assert!(idle.tp.is_none());

    // order and identity of stints survive the rewrite
    assert_eq!(result.stints.len(), 2);
    assert_eq!(result.stints[0].src, ProbeRef::Number(1));
    assert_eq!(result.stints[1].src, ProbeRef::Name("ap".to_string()));
    assert_eq!(result.stints[1].packetsize_bytes, 1024);

    // 0.5 Mbps of 64-byte frames: 976 pkt/s, 195 packets in 0.2 s
    let first = result.stints[0].stats.as_ref().unwrap();
    assert!((first.tp.unwrap() - 499_712.0).abs() < 1.0);
    assert!((first.losses.unwrap() - 0.1).abs() < 0.01);
    assert!(first.gp.unwrap() < first.tp.unwrap());
    assert!(first.median > 4.8 && first.median < 5.2);

    let second = result.stints[1].stats.as_ref().unwrap();
    assert!(second.tp.unwrap() > 1_900_000.0);
    assert!((second.losses.unwrap() - 0.1).abs() < 0.01);

    assert_eq!(result.extra["campaign"], "bench");
    assert_eq!(result.stints[1].extra["note"], "downlink");

    let calls = net.calls();
    assert!(calls.contains(&"10.0.0.1:7778 src.rate 976".to_string()));
    assert!(calls.contains(&"10.0.0.254:8889 src.active true".to_string()));
}

#[tokio::test]
async fn test_failing_meter_records_zero_watts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("joule.json");
    let mut descriptor = Descriptor::from_json(DESCRIPTOR).unwrap();
    descriptor.stints.clear();

    let net = Arc::new(SimulatedNetwork::new(0.0));
    let mut campaign =
        CampaignController::new(&path, descriptor, net, "11g", "20", 1, options()).unwrap();

    // every other fetch fails and is recorded as 0.0, dragging the mean down
    campaign
        .run(SimulatedMeter::new(5.0, 0.0, Duration::from_millis(2)).failing_every(2))
        .await
        .unwrap();

    let idle = Descriptor::load(&path).unwrap().idle.stats.unwrap();
    assert!(idle.mean > 1.5 && idle.mean < 3.5);
    assert!(idle.ci > 0.0);
}

#[tokio::test]
async fn test_campaign_can_run_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("joule.json");
    let mut descriptor = Descriptor::from_json(DESCRIPTOR).unwrap();
    descriptor.stints.truncate(1);

    let net = Arc::new(SimulatedNetwork::new(0.0));
    let mut campaign =
        CampaignController::new(&path, descriptor, net, "11a", "20", 1, options()).unwrap();

    for _ in 0..2 {
        campaign
            .run(SimulatedMeter::new(5.0, 0.0, Duration::from_millis(2)))
            .await
            .unwrap();
        assert_eq!(campaign.phase(), CampaignPhase::Done);
    }

    // the second pass sampled a live meter, not an empty buffer
    let stats = campaign.descriptor().stints[0].stats.as_ref().unwrap();
    assert_eq!(stats.median, 5.0);
}
