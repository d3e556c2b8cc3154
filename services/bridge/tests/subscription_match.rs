//! A session that subscribes to a physiology value receives exactly the
//! matching bus samples, with the manikin selector appended in pod mode.

mod common;

use common::{TestClient, capability_xml, start_bridge, test_options};
use sim_bus::{BusEvent, PhysiologyValue};

#[tokio::test]
async fn subscribed_value_reaches_the_session() {
    let (bridge, broker, _sup) = start_bridge(test_options()).await;
    let mut client = TestClient::connect(&bridge).await;
    client
        .announce(&capability_xml("Vitals Monitor", &[("HR", None)]))
        .await;

    let engine = broker.participant("physiology_engine");
    engine
        .publish(BusEvent::PhysiologyValue(PhysiologyValue {
            name: "HR".to_owned(),
            value: 72.5,
        }))
        .unwrap();

    assert_eq!(client.read_line().await, "HR=72.5|");
}

#[tokio::test]
async fn unsubscribed_values_are_filtered_out() {
    let (bridge, broker, _sup) = start_bridge(test_options()).await;
    let mut client = TestClient::connect(&bridge).await;
    client
        .announce(&capability_xml("Vitals Monitor", &[("HR", None)]))
        .await;

    let engine = broker.participant("physiology_engine");
    engine
        .publish(BusEvent::PhysiologyValue(PhysiologyValue {
            name: "RR".to_owned(),
            value: 14.0,
        }))
        .unwrap();
    engine
        .publish(BusEvent::PhysiologyValue(PhysiologyValue {
            name: "HR".to_owned(),
            value: 61.0,
        }))
        .unwrap();

    // The RR sample must not arrive; the HR sample is next on the wire.
    assert_eq!(client.read_line().await, "HR=61|");
}

#[tokio::test]
async fn pod_mode_appends_the_manikin_selector() {
    let options = bridge::config::BridgeOptions {
        pod_mode: true,
        manikins: 1,
        ..test_options()
    };
    let (bridge, broker, _sup) = start_bridge(options).await;
    let mut client = TestClient::connect(&bridge).await;
    client
        .announce(&capability_xml("Vitals Monitor", &[("HR", None)]))
        .await;

    broker
        .participant("physiology_engine")
        .publish(BusEvent::PhysiologyValue(PhysiologyValue {
            name: "HR".to_owned(),
            value: 72.5,
        }))
        .unwrap();

    assert_eq!(client.read_line().await, "HR=72.5;mid=manikin_1|");
}
