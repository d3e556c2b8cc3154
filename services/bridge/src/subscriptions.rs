//! Per-session topic subscriptions and equipment settings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Subscription index
// ---------------------------------------------------------------------------

/// Session id → the topics it wants (and, informationally, the topics it
/// produces).  Insertion order is preserved; lookups are by membership.
pub struct SubscriptionIndex {
    subscribed: Mutex<HashMap<String, Vec<String>>>,
    published: Mutex<HashMap<String, Vec<String>>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        SubscriptionIndex {
            subscribed: Mutex::new(HashMap::new()),
            published: Mutex::new(HashMap::new()),
        }
    }

    /// Add-if-absent a topic to the session's subscription set.
    pub fn subscribe(&self, session_id: &str, topic: &str) {
        let mut index = self.subscribed.lock().unwrap();
        let topics = index.entry(session_id.to_owned()).or_default();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_owned());
        }
    }

    /// Record a topic the session declares it produces.
    pub fn record_published(&self, session_id: &str, topic: &str) {
        let mut index = self.published.lock().unwrap();
        let topics = index.entry(session_id.to_owned()).or_default();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_owned());
        }
    }

    /// Empty both sets for a session that announced a new capability
    /// document, keeping the session keyed.
    pub fn clear_session(&self, session_id: &str) {
        self.subscribed
            .lock()
            .unwrap()
            .entry(session_id.to_owned())
            .or_default()
            .clear();
        self.published
            .lock()
            .unwrap()
            .entry(session_id.to_owned())
            .or_default()
            .clear();
    }

    /// Drop every trace of a disconnected session.
    pub fn forget_session(&self, session_id: &str) {
        self.subscribed.lock().unwrap().remove(session_id);
        self.published.lock().unwrap().remove(session_id);
    }

    pub fn is_subscribed(&self, session_id: &str, topic: &str) -> bool {
        self.subscribed
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|topics| topics.iter().any(|t| t == topic))
    }

    /// Ids of every session subscribed to at least one of `topics`.
    pub fn sessions_matching(&self, topics: &[&str]) -> Vec<String> {
        self.subscribed
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, subscribed)| {
                subscribed.iter().any(|t| topics.contains(&t.as_str()))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn topics_for(&self, session_id: &str) -> Vec<String> {
        self.subscribed
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every session id currently keyed in the subscription index.
    pub fn session_ids(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        SubscriptionIndex::new()
    }
}

// ---------------------------------------------------------------------------
// Equipment settings
// ---------------------------------------------------------------------------

/// Capability → setting name → value.  Seeded from a capability document's
/// starting settings, merged from later configuration updates.
pub struct EquipmentSettings {
    settings: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl EquipmentSettings {
    pub fn new() -> Self {
        EquipmentSettings {
            settings: Mutex::new(HashMap::new()),
        }
    }

    pub fn merge(&self, capability: &str, entries: &[(String, String)]) {
        let mut settings = self.settings.lock().unwrap();
        let inner = settings.entry(capability.to_owned()).or_default();
        for (name, value) in entries {
            inner.insert(name.clone(), value.clone());
        }
    }

    pub fn get(&self, capability: &str, name: &str) -> Option<String> {
        self.settings
            .lock()
            .unwrap()
            .get(capability)
            .and_then(|inner| inner.get(name).cloned())
    }

    /// Serialize a capability's settings as `name=value` lines for an
    /// instrument-data publication.  `None` when the capability is unknown.
    pub fn payload_for(&self, capability: &str) -> Option<String> {
        let settings = self.settings.lock().unwrap();
        let inner = settings.get(capability)?;
        let mut payload = String::new();
        for (name, value) in inner {
            payload.push_str(name);
            payload.push('=');
            payload.push_str(value);
            payload.push('\n');
        }
        Some(payload)
    }
}

impl Default for EquipmentSettings {
    fn default() -> Self {
        EquipmentSettings::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let index = SubscriptionIndex::new();
        index.subscribe("s1", "HR");
        index.subscribe("s1", "HR");
        index.subscribe("s1", "AMM_Status");
        assert_eq!(index.topics_for("s1"), vec!["HR", "AMM_Status"]);
    }

    #[test]
    fn sessions_matching_any_of_the_given_topics() {
        let index = SubscriptionIndex::new();
        index.subscribe("s1", "AMM_Physiology_Modification");
        index.subscribe("s2", "Hemorrhage");
        index.subscribe("s3", "HR");

        let mut hit = index.sessions_matching(&["Hemorrhage", "AMM_Physiology_Modification"]);
        hit.sort();
        assert_eq!(hit, vec!["s1", "s2"]);
    }

    #[test]
    fn clear_session_empties_but_keeps_the_key() {
        let index = SubscriptionIndex::new();
        index.subscribe("s1", "HR");
        index.record_published("s1", "AMM_Status");
        index.clear_session("s1");
        assert!(index.topics_for("s1").is_empty());
        assert_eq!(index.session_ids(), vec!["s1"]);
    }

    #[test]
    fn forget_session_removes_the_key() {
        let index = SubscriptionIndex::new();
        index.subscribe("s1", "HR");
        index.forget_session("s1");
        assert!(index.session_ids().is_empty());
        assert!(!index.is_subscribed("s1", "HR"));
    }

    #[test]
    fn settings_merge_overwrites_and_serializes_sorted() {
        let settings = EquipmentSettings::new();
        settings.merge(
            "ivpump",
            &[
                ("rate".to_owned(), "10".to_owned()),
                ("drug".to_owned(), "saline".to_owned()),
            ],
        );
        settings.merge("ivpump", &[("rate".to_owned(), "15".to_owned())]);

        assert_eq!(settings.get("ivpump", "rate").unwrap(), "15");
        assert_eq!(
            settings.payload_for("ivpump").unwrap(),
            "drug=saline\nrate=15\n"
        );
        assert!(settings.payload_for("ventilator").is_none());
    }
}
