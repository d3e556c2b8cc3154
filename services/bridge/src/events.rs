//! Event-record correlation cache.
//!
//! Every event record seen on the bus (including omitted events promoted to
//! records) is kept by id so that later modifications and assessments
//! referencing the same event can be enriched with its location and
//! participant.  A modification arriving before its record simply goes out
//! with those fields empty.

use sim_bus::EventRecord;
use std::collections::HashMap;
use std::sync::Mutex;

/// Correlation fields pulled out of a cached event record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    pub location: String,
    pub participant_id: String,
    pub event_type: String,
}

pub struct EventRecordCache {
    records: Mutex<HashMap<String, EventRecord>>,
}

impl EventRecordCache {
    pub fn new() -> Self {
        EventRecordCache {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self, record: EventRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.records.lock().unwrap().contains_key(event_id)
    }

    /// Look up the correlation fields for `event_id`; empty strings when the
    /// record has not been seen.
    pub fn correlate(&self, event_id: &str) -> Correlation {
        match self.records.lock().unwrap().get(event_id) {
            Some(record) => Correlation {
                location: record.location.name.clone(),
                participant_id: record.agent_id.clone(),
                event_type: record.event_type.clone(),
            },
            None => Correlation::default(),
        }
    }
}

impl Default for EventRecordCache {
    fn default() -> Self {
        EventRecordCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_bus::FmaLocation;

    #[test]
    fn correlate_returns_cached_fields() {
        let cache = EventRecordCache::new();
        cache.store(EventRecord {
            id: "E1".to_owned(),
            location: FmaLocation::named("LeftArm"),
            agent_id: "Jane".to_owned(),
            event_type: "Injury".to_owned(),
            ..EventRecord::default()
        });

        let c = cache.correlate("E1");
        assert_eq!(c.location, "LeftArm");
        assert_eq!(c.participant_id, "Jane");
        assert_eq!(c.event_type, "Injury");
    }

    #[test]
    fn unknown_event_yields_empty_fields() {
        let cache = EventRecordCache::new();
        assert_eq!(cache.correlate("E404"), Correlation::default());
        assert!(!cache.contains("E404"));
    }

    #[test]
    fn later_record_replaces_earlier_one() {
        let cache = EventRecordCache::new();
        cache.store(EventRecord {
            id: "E1".to_owned(),
            agent_id: "first".to_owned(),
            ..EventRecord::default()
        });
        cache.store(EventRecord {
            id: "E1".to_owned(),
            agent_id: "second".to_owned(),
            ..EventRecord::default()
        });
        assert_eq!(cache.correlate("E1").participant_id, "second");
    }
}
