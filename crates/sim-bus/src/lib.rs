// sim-bus: typed publish/subscribe plumbing for the simulation data bus.
//
// The bridge programs against typed samples and topic names; the transport
// behind them is an in-process broker handing out participants.  Every
// participant sees every publication on a topic it subscribes to, including
// its own — event correlation depends on that loopback.

mod bus;
mod samples;
mod topic;

pub use bus::{Broker, BusEvent, Participant, PublishError, generate_uuid};
pub use samples::{
    Assessment, AssessmentValue, Command, ControlType, EventRecord, FmaLocation, InstrumentData,
    ModuleConfiguration, OmittedEvent, OperationalDescription, PhysiologyModification,
    PhysiologyValue, PhysiologyWaveform, RenderModification, SimulationControl, Status,
    StatusValue,
};
pub use topic::Topic;
