//! In-process broker and participants.
//!
//! The broker carries every topic on one totally-ordered broadcast channel;
//! a [`Participant`] publishes into it and drains its topic selection
//! through a filtered mpsc receiver.  Two subscribers therefore observe any
//! pair of samples in the same relative order — event records always land
//! before the modifications that reference them, as long as they were
//! published first.  Zero subscribers is not an error, and a subscriber
//! that lags behind the channel capacity loses the overwritten samples
//! rather than stalling the publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::samples::{
    Assessment, Command, EventRecord, InstrumentData, ModuleConfiguration, OmittedEvent,
    OperationalDescription, PhysiologyModification, PhysiologyValue, PhysiologyWaveform,
    RenderModification, SimulationControl, Status,
};
use crate::topic::Topic;

/// Capacity of the shared broadcast channel.
const BUS_CAPACITY: usize = 1024;

/// Capacity of a participant's filtered subscription queue.
const QUEUE_CAPACITY: usize = 1024;

/// Mint a fresh v4 UUID in its canonical string form.
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("bus has been shut down")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// Bus events
// ---------------------------------------------------------------------------

/// One sample received from (or published to) the bus, tagged by topic.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Status(Status),
    EventRecord(EventRecord),
    OmittedEvent(OmittedEvent),
    RenderModification(RenderModification),
    PhysiologyModification(PhysiologyModification),
    Assessment(Assessment),
    PerformanceAssessment(Assessment),
    Command(Command),
    InstrumentData(InstrumentData),
    ModuleConfiguration(ModuleConfiguration),
    OperationalDescription(OperationalDescription),
    SimulationControl(SimulationControl),
    PhysiologyValue(PhysiologyValue),
    PhysiologyWaveform(PhysiologyWaveform),
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::Status(_) => Topic::Status,
            BusEvent::EventRecord(_) => Topic::EventRecord,
            BusEvent::OmittedEvent(_) => Topic::OmittedEvent,
            BusEvent::RenderModification(_) => Topic::RenderModification,
            BusEvent::PhysiologyModification(_) => Topic::PhysiologyModification,
            BusEvent::Assessment(_) => Topic::Assessment,
            BusEvent::PerformanceAssessment(_) => Topic::PerformanceAssessment,
            BusEvent::Command(_) => Topic::Command,
            BusEvent::InstrumentData(_) => Topic::InstrumentData,
            BusEvent::ModuleConfiguration(_) => Topic::ModuleConfiguration,
            BusEvent::OperationalDescription(_) => Topic::OperationalDescription,
            BusEvent::SimulationControl(_) => Topic::SimulationControl,
            BusEvent::PhysiologyValue(_) => Topic::PhysiologyValue,
            BusEvent::PhysiologyWaveform(_) => Topic::PhysiologyWaveform,
        }
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// The process-wide bus.
pub struct Broker {
    channel: broadcast::Sender<BusEvent>,
    stopped: AtomicBool,
}

impl Broker {
    pub fn new() -> Arc<Broker> {
        let (channel, _rx) = broadcast::channel(BUS_CAPACITY);
        Arc::new(Broker {
            channel,
            stopped: AtomicBool::new(false),
        })
    }

    /// Join the bus under `participant_id` (used only for log attribution).
    pub fn participant(self: &Arc<Self>, participant_id: impl Into<String>) -> Participant {
        Participant {
            id: participant_id.into(),
            broker: Arc::clone(self),
        }
    }

    /// Stop accepting publications.  Subscriber tasks drain what is already
    /// queued and exit once the channel empties.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One bus membership.  The owner publishes through `&self` and holds the
/// filtered subscription receiver.
pub struct Participant {
    id: String,
    broker: Arc<Broker>,
}

impl Participant {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish one sample.  Returns the number of attached subscribers; a
    /// bus with nobody listening is not an error.
    pub fn publish(&self, event: BusEvent) -> Result<usize, PublishError> {
        if self.broker.stopped.load(Ordering::SeqCst) {
            return Err(PublishError::Shutdown);
        }
        match self.broker.channel.send(event) {
            Ok(n) => Ok(n),
            Err(_) => Ok(0),
        }
    }

    /// Subscribe to `topics`, receiving matching samples in publish order.
    ///
    /// The forwarding task exits when the returned receiver is dropped.  A
    /// subscriber that falls behind the bus capacity skips the lost samples
    /// and keeps going.
    pub fn subscribe(&self, topics: &[Topic]) -> mpsc::Receiver<BusEvent> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let mut bus_rx = self.broker.channel.subscribe();
        let wanted: Vec<Topic> = topics.to_vec();
        let participant_id = self.id.clone();
        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(event) => {
                        if !wanted.contains(&event.topic()) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            participant = %participant_id,
                            missed,
                            "subscriber lagged; samples dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }
}
