/// On-bus topic names.
///
/// The string forms are the wire-level topic names shared with every other
/// module on the bus; clients also use them verbatim in capability documents
/// and inbound message envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Status,
    EventRecord,
    OmittedEvent,
    RenderModification,
    PhysiologyModification,
    Assessment,
    PerformanceAssessment,
    Command,
    InstrumentData,
    ModuleConfiguration,
    OperationalDescription,
    SimulationControl,
    PhysiologyValue,
    PhysiologyWaveform,
}

impl Topic {
    /// Every topic the broker carries.
    pub const ALL: [Topic; 14] = [
        Topic::Status,
        Topic::EventRecord,
        Topic::OmittedEvent,
        Topic::RenderModification,
        Topic::PhysiologyModification,
        Topic::Assessment,
        Topic::PerformanceAssessment,
        Topic::Command,
        Topic::InstrumentData,
        Topic::ModuleConfiguration,
        Topic::OperationalDescription,
        Topic::SimulationControl,
        Topic::PhysiologyValue,
        Topic::PhysiologyWaveform,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Status => "AMM_Status",
            Topic::EventRecord => "AMM_EventRecord",
            Topic::OmittedEvent => "AMM_OmittedEvent",
            Topic::RenderModification => "AMM_Render_Modification",
            Topic::PhysiologyModification => "AMM_Physiology_Modification",
            Topic::Assessment => "AMM_Assessment",
            Topic::PerformanceAssessment => "AMM_Performance_Assessment",
            Topic::Command => "AMM_Command",
            Topic::InstrumentData => "AMM_InstrumentData",
            Topic::ModuleConfiguration => "AMM_ModuleConfiguration",
            Topic::OperationalDescription => "AMM_OperationalDescription",
            Topic::SimulationControl => "AMM_Simulation_Control",
            Topic::PhysiologyValue => "AMM_PhysiologyValue",
            Topic::PhysiologyWaveform => "AMM_PhysiologyWaveform",
        }
    }

    /// Reverse lookup for envelope and capability parsing.
    pub fn from_name(name: &str) -> Option<Topic> {
        Topic::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Topic;

    #[test]
    fn round_trips_every_topic_name() {
        for topic in Topic::ALL {
            assert_eq!(Topic::from_name(topic.as_str()), Some(topic));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Topic::from_name("AMM_NoSuchTopic"), None);
    }
}
