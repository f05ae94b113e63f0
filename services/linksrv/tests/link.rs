//! Device link behaviour across disconnects, driven through mock sessions

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use linksrv::codec::{encode_command, encode_reading};
use linksrv::{Command, DeviceLink, LinkConfig, LinkState, MockConnector, Reading, Session};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> LinkConfig {
    LinkConfig {
        reconnect_cooldown_ms: 5,
        retry_interval_ms: 5,
        read_idle_ms: 1,
        write_pacing_ms: 1,
        stop_timeout_ms: 1000,
        ..LinkConfig::default()
    }
}

fn uniform(value: f32) -> Reading {
    Reading::from_array([value; 8])
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .expect("timed out")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_initial_connect_retries_until_port_appears() {
    let connector = Arc::new(MockConnector::new("ttyACM0"));
    connector.fail_next_connects(3);
    let link = DeviceLink::start(
        &LinkConfig {
            retry_interval_ms: 2000,
            ..LinkConfig::default()
        },
        connector.clone(),
    );

    // Queued while no session exists
    link.send_command(11).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(link.state(), LinkState::Reconnecting);
    assert!(link.get_latest_reading().is_none());

    link.wait_for_state(LinkState::Connected).await.unwrap();
    assert_eq!(connector.attempts(), 4);

    let session = connector.latest_session().unwrap();
    session.wait_for_writes(1).await;
    assert_eq!(session.written(), vec![encode_command(Command(11))]);
    assert_eq!(link.stats().failed_connects, 3);

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_long_outage_never_stops_link() {
    let connector = Arc::new(MockConnector::new("ttyACM0"));
    connector.fail_next_connects(50);
    let link = DeviceLink::start(&LinkConfig::default(), connector.clone());

    // Well past any plausible give-up point
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(link.state(), LinkState::Reconnecting);
    assert!(!link.is_stopped());
    link.send_command(1).unwrap();

    link.wait_for_state(LinkState::Connected).await.unwrap();
    assert_eq!(connector.attempts(), 51);
    let session = connector.latest_session().unwrap();
    session.wait_for_writes(1).await;
    assert_eq!(session.written(), vec![encode_command(Command(1))]);
    assert_eq!(link.stats().failed_connects, 50);

    link.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_unplug() {
    let connector = Arc::new(MockConnector::new("ttyACM0"));
    let link = DeviceLink::start(&LinkConfig::default(), connector.clone());
    link.wait_for_state(LinkState::Connected).await.unwrap();

    let first = connector.latest_session().unwrap();
    first.push_inbound(&encode_reading(&uniform(1.0)));
    wait_until(|| link.get_latest_reading() == Some(uniform(1.0))).await;

    let mut states = link.subscribe_state();
    first.fail_reads();
    states
        .wait_for(|s| *s == LinkState::Faulted)
        .await
        .unwrap();

    // Stale value stays visible during the outage
    assert_eq!(link.get_latest_reading(), Some(uniform(1.0)));
    assert_eq!(link.current_epoch(), None);

    let second = connector.wait_for_session(2).await;
    link.wait_for_state(LinkState::Connected).await.unwrap();
    assert!(!first.is_open());
    assert_eq!(link.current_epoch(), Some(2));

    second.push_inbound(&encode_reading(&uniform(2.0)));
    wait_until(|| link.get_latest_reading() == Some(uniform(2.0))).await;

    link.send_command(7).unwrap();
    second.wait_for_writes(1).await;
    assert_eq!(second.written(), vec![encode_command(Command(7))]);
    assert!(first.written().is_empty());

    let stats = link.stats();
    assert_eq!(stats.faults, 1);
    assert_eq!(stats.reconnects(), 1);

    link.stop().await;
    assert!(!second.is_open());
    assert_eq!(link.state(), LinkState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_dropped_and_triggers_reconnect() {
    let connector = Arc::new(MockConnector::new("ttyACM0"));
    let link = DeviceLink::start(&LinkConfig::default(), connector.clone());
    link.wait_for_state(LinkState::Connected).await.unwrap();

    let first = connector.latest_session().unwrap();
    first.fail_writes();
    link.send_command(1).unwrap();

    let second = connector.wait_for_session(2).await;
    link.send_command(2).unwrap();
    second.wait_for_writes(1).await;

    // The failed command is not replayed
    assert_eq!(second.written(), vec![encode_command(Command(2))]);
    let stats = link.stats();
    assert_eq!(stats.commands_dropped, 1);
    assert_eq!(stats.commands_sent, 1);

    link.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alternating_faults_never_tear_or_cross_epochs() {
    const ROUNDS: u32 = 6;

    let connector = Arc::new(MockConnector::new("ttyACM0"));
    let link = Arc::new(DeviceLink::start(&fast_config(), connector.clone()));

    let stop_polling = CancellationToken::new();
    let poller = tokio::spawn({
        let link = link.clone();
        let stop = stop_polling.clone();
        async move {
            let mut observed = 0u64;
            while !stop.is_cancelled() {
                if let Some(reading) = link.get_latest_reading() {
                    let values = reading.to_array();
                    assert!(
                        values.iter().all(|v| *v == values[0]),
                        "mixed reading observed: {reading:?}"
                    );
                    observed += 1;
                }
                tokio::task::yield_now().await;
            }
            observed
        }
    });

    for round in 1..=ROUNDS {
        let session = within(connector.wait_for_session(round as usize)).await;
        wait_until(|| link.current_epoch() == Some(u64::from(round))).await;

        for _ in 0..20 {
            session.push_inbound(&encode_reading(&uniform(round as f32)));
        }
        wait_until(|| link.get_latest_reading() == Some(uniform(round as f32))).await;

        link.send_command(round as i32).unwrap();
        within(session.wait_for_writes(1)).await;

        if round % 2 == 1 {
            session.fail_reads();
        } else {
            session.fail_writes();
            link.send_command(-(round as i32)).unwrap();
        }
    }
    within(connector.wait_for_session(ROUNDS as usize + 1)).await;

    stop_polling.cancel();
    assert!(poller.await.unwrap() > 0);
    link.stop().await;

    // Each command landed on the session that was current when it was sent
    let sessions = connector.sessions();
    for (i, session) in sessions.iter().take(ROUNDS as usize).enumerate() {
        assert_eq!(
            session.written(),
            vec![encode_command(Command(i as i32 + 1))],
            "session {}",
            session.port_name()
        );
        assert_eq!(session.close_count(), 1);
    }

    let stats = link.stats();
    assert_eq!(stats.faults, u64::from(ROUNDS));
    assert_eq!(stats.connects, u64::from(ROUNDS) + 1);
    assert_eq!(stats.commands_dropped, u64::from(ROUNDS / 2));
    assert_eq!(stats.frames_dropped, 0);
}
