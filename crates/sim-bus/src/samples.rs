// Typed bus samples.
//
// These are the payload shapes exchanged with the rest of the simulation:
// physiology data flowing out of a patient model, clinical events and
// modifications flowing in from instructor consoles and simulators, and the
// module bookkeeping samples (status, configuration, description).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// An anatomical location, named against the FMA ontology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FmaLocation {
    pub name: String,
}

impl FmaLocation {
    pub fn named(name: impl Into<String>) -> Self {
        FmaLocation { name: name.into() }
    }
}

/// Module health as reported on the status topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusValue {
    #[default]
    Operational,
    Inoperative,
}

impl StatusValue {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusValue::Operational => "OPERATIONAL",
            StatusValue::Inoperative => "INOPERATIVE",
        }
    }

    /// Numeric code used in the client-facing status envelope.
    pub fn code(self) -> u8 {
        match self {
            StatusValue::Operational => 0,
            StatusValue::Inoperative => 1,
        }
    }
}

/// Outcome attached to an assessment sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentValue {
    OmissionError,
    CommissionError,
    ExecutionError,
    #[default]
    Success,
}

impl AssessmentValue {
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentValue::OmissionError => "OMISSION_ERROR",
            AssessmentValue::CommissionError => "COMMISSION_ERROR",
            AssessmentValue::ExecutionError => "EXECUTION_ERROR",
            AssessmentValue::Success => "SUCCESS",
        }
    }
}

/// Simulation lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    Run,
    Halt,
    Reset,
    Save,
}

// ---------------------------------------------------------------------------
// Event samples
// ---------------------------------------------------------------------------

/// An on-bus description of a clinical action.  Later modifications and
/// assessments reference it through `event_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub location: FmaLocation,
    pub agent_id: String,
    pub event_type: String,
    pub timestamp_ms: i64,
    pub agent_type: String,
    pub data: String,
}

/// An event reported after the fact.  Carries the same shape as an
/// [`EventRecord`] and is promoted to one on receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OmittedEvent {
    pub id: String,
    pub location: FmaLocation,
    pub agent_id: String,
    pub event_type: String,
    pub timestamp_ms: i64,
    pub agent_type: String,
    pub data: String,
}

impl OmittedEvent {
    /// Promote to the event record this omission stands in for.
    pub fn into_event_record(self) -> EventRecord {
        EventRecord {
            id: self.id,
            location: self.location,
            agent_id: self.agent_id,
            event_type: self.event_type,
            timestamp_ms: self.timestamp_ms,
            agent_type: self.agent_type,
            data: self.data,
        }
    }
}

// ---------------------------------------------------------------------------
// Modification and assessment samples
// ---------------------------------------------------------------------------

/// A render-time change (visuals, sounds, moulage) triggered by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderModification {
    pub id: String,
    pub event_id: String,
    pub mod_type: String,
    pub data: String,
}

/// A physiology-engine change triggered by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysiologyModification {
    pub id: String,
    pub event_id: String,
    pub mod_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub event_id: String,
    pub value: AssessmentValue,
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Module bookkeeping samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub module_id: String,
    pub module_name: String,
    pub capability: String,
    pub value: StatusValue,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationControl {
    pub control_type: ControlType,
    pub timestamp_ms: i64,
}

/// A free-form command line.  `[SYS]`-prefixed messages drive the bridge's
/// own command interpreter; everything else is relayed to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub message: String,
}

/// Settings snapshot for one piece of equipment, serialized as `k=v` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentData {
    pub instrument: String,
    pub payload: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfiguration {
    pub module_id: String,
    pub name: String,
    pub capabilities_configuration: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalDescription {
    pub name: String,
    pub description: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub module_id: String,
    pub module_version: String,
    pub configuration_version: String,
    pub amm_version: String,
    pub capabilities_schema: String,
}

// ---------------------------------------------------------------------------
// Physiology samples
// ---------------------------------------------------------------------------

/// A single named physiology measurement (heart rate, lab value, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysiologyValue {
    pub name: String,
    pub value: f64,
}

/// One point of a high-frequency waveform (ECG, capnography, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysiologyWaveform {
    pub name: String,
    pub value: f64,
}
