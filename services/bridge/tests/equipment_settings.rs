//! Equipment settings flow: seeded from a capability announcement, merged
//! from later settings updates, published as instrument data each time.

mod common;

use common::{TestClient, encode, start_bridge, test_options};
use sim_bus::{BusEvent, Topic};
use tokio::time::{Duration, timeout};

const CAPABILITY_WITH_SETTINGS: &str = r#"<AMMModuleConfiguration><module name="IV Pump"><capabilities><capability name="ivpump"><starting_settings><setting name="rate" value="10"/><setting name="drug" value="saline"/></starting_settings></capability></capabilities></module></AMMModuleConfiguration>"#;

const SETTINGS_UPDATE: &str = r#"<AMMModuleConfiguration><module name="IV Pump"><capabilities><capability name="ivpump"><configuration><setting name="rate" value="15"/></configuration></capability></capabilities></module></AMMModuleConfiguration>"#;

async fn next_instrument_data(
    rx: &mut tokio::sync::mpsc::Receiver<BusEvent>,
) -> sim_bus::InstrumentData {
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(BusEvent::InstrumentData(data)) => break data,
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
    })
    .await
    .expect("instrument data timeout")
}

#[tokio::test]
async fn starting_settings_are_published_then_merged() {
    let (bridge, broker, _sup) = start_bridge(test_options()).await;
    let observer = broker.participant("observer");
    let mut instruments = observer.subscribe(&[Topic::InstrumentData]);
    tokio::task::yield_now().await;

    let mut client = TestClient::connect(&bridge).await;
    client.announce(CAPABILITY_WITH_SETTINGS).await;

    let seeded = next_instrument_data(&mut instruments).await;
    assert_eq!(seeded.instrument, "ivpump");
    assert_eq!(seeded.payload, "drug=saline\nrate=10\n");

    client
        .send_line(&format!("SETTINGS={}", encode(SETTINGS_UPDATE)))
        .await;

    let merged = next_instrument_data(&mut instruments).await;
    assert_eq!(merged.instrument, "ivpump");
    assert_eq!(merged.payload, "drug=saline\nrate=15\n");
}
