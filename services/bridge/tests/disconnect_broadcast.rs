//! Closing a session triggers exactly-once cleanup: a DISCONNECTED update
//! goes out on the bus and every index forgets the session.

mod common;

use common::{TestClient, capability_xml, start_bridge, test_options};
use sim_bus::{BusEvent, Topic};
use tokio::time::{Duration, sleep, timeout};

#[tokio::test]
async fn dropped_socket_broadcasts_disconnect_and_clears_indices() {
    let (bridge, broker, _sup) = start_bridge(test_options()).await;

    let observer = broker.participant("observer");
    let mut commands = observer.subscribe(&[Topic::Command]);
    tokio::task::yield_now().await;

    let mut client = TestClient::connect(&bridge).await;
    let session_id = client
        .announce(&capability_xml("Vitals Monitor", &[("HR", None)]))
        .await;
    let manikin = bridge.hub().pod.default_manikin();
    assert!(manikin.is_session_subscribed(&session_id, "HR"));

    drop(client);

    let update = timeout(Duration::from_secs(2), async {
        loop {
            match commands.recv().await {
                Some(BusEvent::Command(c)) if c.message.starts_with("[SYS]UPDATE_CLIENT=") => {
                    break c.message;
                }
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("disconnect broadcast timeout");
    assert!(update.contains(&format!("client_id={session_id}")), "{update}");
    assert!(update.contains("client_status=DISCONNECTED"), "{update}");

    // Bookkeeping completes within a cycle: the subscription index forgets
    // the session and the record is retired after the bus round trip.
    for _ in 0..20 {
        if manikin.subscribed_session_ids().is_empty()
            && bridge.hub().records.get(&session_id).is_none()
        {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("indices were not cleaned up");
}

#[tokio::test]
async fn clients_request_never_reports_a_closed_session_as_connected() {
    let (bridge, _broker, _sup) = start_bridge(test_options()).await;

    let mut watcher = TestClient::connect(&bridge).await;
    let mut doomed = TestClient::connect(&bridge).await;
    let doomed_id = doomed
        .announce(&capability_xml("Vitals Monitor", &[("HR", None)]))
        .await;
    drop(doomed);

    // Give the cleanup a bookkeeping cycle.
    sleep(Duration::from_millis(300)).await;

    watcher.send_line("REQUEST=CLIENTS").await;
    let lines = watcher.read_until_quiet().await;
    assert!(
        lines
            .iter()
            .all(|l| !(l.contains(&doomed_id) && l.contains(",CONNECTED,"))),
        "{lines:?}"
    );
}
