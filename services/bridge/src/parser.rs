//! Inbound line parsing: prefix routing, key/value extraction, base64
//! payload decoding and event-record minting.
//!
//! First matching prefix wins.  A malformed payload drops only the offending
//! line; the session and any other lines in the same read keep going.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sim_bus::{
    Assessment, BusEvent, EventRecord, FmaLocation, ModuleConfiguration, PhysiologyModification,
    RenderModification, generate_uuid,
};
use std::collections::HashMap;
use tracing::{debug, error, info, trace, warn};

use crate::hub::Hub;
use crate::registry::SessionHandle;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Route one framed, trimmed, non-empty line from a session.  Returns
/// whether the line was successfully processed.
pub async fn process_line(hub: &Hub, session: &SessionHandle, line: &str) -> bool {
    if line.starts_with("[KEEPALIVE]") {
        // Liveness only; the caller refreshes the activity timestamp.
        return true;
    }
    if let Some(name) = line.strip_prefix("MODULE_NAME=") {
        debug!(session = %session.id, module = name, "module connected");
        hub.registry.set_name(&session.id, name);
        hub.records.update(&session.id, |record| {
            record.client_name = name.to_owned();
        });
        return true;
    }
    if let Some(body) = line.strip_prefix("REGISTER=") {
        let mut parts = body.splitn(2, ';');
        let name = parts.next().unwrap_or_default();
        let learner = parts.next().unwrap_or_default();
        info!(session = %session.id, name, learner, "client registered");
        if !name.is_empty() {
            hub.registry.set_name(&session.id, name);
        }
        hub.records.update(&session.id, |record| {
            if !name.is_empty() {
                record.client_name = name.to_owned();
            }
            record.learner_name = learner.to_owned();
        });
        hub.registry
            .broadcast(&format!("CLIENT_JOINED={}\n", session.id))
            .await;
        return true;
    }
    if let Some(target) = line.strip_prefix("KICK=") {
        info!(session = %session.id, target, "kick requested");
        hub.records.remove(target);
        hub.pod
            .for_line(line)
            .publish_command_message(format!("KICK_CLIENT={target}"));
        return true;
    }
    if let Some(encoded) = line.strip_prefix("STATUS=") {
        let manikin = hub.pod.for_line(line);
        return match decode_payload(encoded) {
            Ok(xml) => match manikin.handle_status(&session.id, &xml) {
                Ok(()) => true,
                Err(e) => {
                    error!(session = %session.id, error = %e, "bad status document");
                    false
                }
            },
            Err(e) => {
                error!(session = %session.id, error = %e, "bad status payload");
                false
            }
        };
    }
    if let Some(encoded) = line.strip_prefix("CAPABILITY=") {
        let manikin = hub.pod.for_line(line);
        let outcome = decode_payload(encoded)
            .map_err(|e| error!(session = %session.id, error = %e, "bad capability payload"))
            .and_then(|xml| {
                manikin
                    .handle_capabilities(&session.id, &xml)
                    .map_err(|e| error!(session = %session.id, error = %e, "bad capability document"))
            });
        match outcome {
            Ok(()) => {
                session
                    .send(format!("CAPABILITIES_RECEIVED={}\n", session.id))
                    .await;
                return true;
            }
            Err(()) => {
                session
                    .send(format!("ERROR_IN_CAPABILITIES_RECEIVED={}\n", session.id))
                    .await;
                return false;
            }
        }
    }
    if let Some(encoded) = line.strip_prefix("SETTINGS=") {
        let manikin = hub.pod.for_line(line);
        return match decode_payload(encoded) {
            Ok(xml) => match manikin.handle_settings(&session.id, &xml) {
                Ok(()) => true,
                Err(e) => {
                    error!(session = %session.id, error = %e, "bad settings document");
                    false
                }
            },
            Err(e) => {
                error!(session = %session.id, error = %e, "bad settings payload");
                false
            }
        };
    }
    if let Some(flag) = line.strip_prefix("KEEP_HISTORY=") {
        let keep = flag == "TRUE";
        debug!(session = %session.id, keep, "history preference");
        hub.registry.set_keep_history(&session.id, keep);
        return true;
    }
    if let Some(request) = line.strip_prefix("REQUEST=") {
        hub.pod.for_line(line).dispatch_request(session, request).await;
        return true;
    }
    if let Some(action) = line.strip_prefix("ACT=") {
        info!(session = %session.id, action, "posting action to the bus");
        hub.pod.for_line(line).publish_command_message(action);
        return true;
    }
    if line.starts_with('[') {
        return ingest_topic_message(hub, session, line);
    }

    error!(session = %session.id, line, "unknown message");
    false
}

// ---------------------------------------------------------------------------
// Topic envelope ingestion
// ---------------------------------------------------------------------------

/// `[<TOPIC>]<kvp...>` lines mint events on the bus: an event record first,
/// then the typed modification the topic names.
fn ingest_topic_message(hub: &Hub, session: &SessionHandle, line: &str) -> bool {
    let Some(end) = line.find(']') else {
        error!(session = %session.id, line, "unterminated topic envelope");
        return false;
    };
    let topic = &line[1..end];
    let body = &line[end + 1..];
    if topic == "KEEPALIVE" {
        return true;
    }
    info!(session = %session.id, topic, "topic message received");

    let kvp = parse_kvp(body);
    let manikin = match kvp.get("mid") {
        Some(mid) => hub.pod.for_mid(mid),
        None => hub.pod.default_manikin(),
    };

    let location = kvp.get("location").cloned().unwrap_or_default();
    let participant = kvp
        .get("participant_id")
        .map(|p| strip_quotes(p).to_owned())
        .unwrap_or_default();
    let payload = kvp.get("payload").cloned().unwrap_or_default();
    let info = kvp.get("info").cloned().unwrap_or_default();
    let event_id = kvp
        .get("event_id")
        .cloned()
        .unwrap_or_else(generate_uuid);
    let mut mod_type = kvp.get("type").cloned().unwrap_or_default();
    if mod_type.is_empty() {
        mod_type = extract_type_attr(&payload).unwrap_or_default();
    }

    let event_record = EventRecord {
        id: event_id.clone(),
        location: FmaLocation::named(location),
        agent_id: participant,
        event_type: mod_type.clone(),
        ..EventRecord::default()
    };

    match topic {
        "AMM_Render_Modification" => {
            manikin.publish(BusEvent::EventRecord(event_record));
            let data = if payload.is_empty() && !mod_type.is_empty() {
                format!("<RenderModification type='{mod_type}'/>")
            } else {
                payload
            };
            manikin.publish(BusEvent::RenderModification(RenderModification {
                id: String::new(),
                event_id,
                mod_type,
                data,
            }));
        }
        "AMM_Physiology_Modification" => {
            manikin.publish(BusEvent::EventRecord(event_record));
            manikin.publish(BusEvent::PhysiologyModification(PhysiologyModification {
                id: String::new(),
                event_id,
                mod_type,
                data: payload,
            }));
        }
        "AMM_Assessment" => {
            manikin.publish(BusEvent::EventRecord(event_record));
            manikin.publish(BusEvent::Assessment(Assessment {
                id: String::new(),
                event_id,
                comment: info,
                ..Assessment::default()
            }));
        }
        "AMM_Performance_Assessment" => {
            manikin.publish(BusEvent::EventRecord(event_record));
            manikin.publish(BusEvent::PerformanceAssessment(Assessment {
                id: String::new(),
                event_id,
                comment: info,
                ..Assessment::default()
            }));
        }
        "AMM_Command" => {
            manikin.publish_command_message(body);
        }
        "AMM_ModuleConfiguration" => {
            manikin.publish(BusEvent::EventRecord(event_record));
            manikin.publish(BusEvent::ModuleConfiguration(ModuleConfiguration {
                module_id: String::new(),
                name: mod_type,
                capabilities_configuration: payload,
                timestamp_ms: 0,
            }));
        }
        other => {
            debug!(session = %session.id, topic = other, "unknown topic");
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Extraction helpers
// ---------------------------------------------------------------------------

/// Parse a `;`-separated `k=v` list.  Keys are lowercased and trimmed;
/// tokens without `=` are logged and skipped.
pub fn parse_kvp(body: &str) -> HashMap<String, String> {
    let mut kvp = HashMap::new();
    for token in body.split(';') {
        if token.is_empty() {
            continue;
        }
        match token.find('=') {
            Some(sep) => {
                let key = token[..sep].trim().to_lowercase();
                let value = token[sep + 1..].to_owned();
                trace!(key, value, "kvp token");
                kvp.insert(key, value);
            }
            None => warn!(token, "malformed token, skipping"),
        }
    }
    kvp
}

/// Pull the `mid=<id>;` selector out of a message, if present.
pub fn extract_mid(message: &str) -> Option<String> {
    let rest = &message[message.find("mid=")? + "mid=".len()..];
    Some(match rest.find(';') {
        Some(end) => rest[..end].to_owned(),
        None => rest.to_owned(),
    })
}

/// Best-effort extraction of the `type="..."` (or `type='...'`) attribute
/// from an XML payload.
pub fn extract_type_attr(payload: &str) -> Option<String> {
    let rest = &payload[payload.find("type=")? + "type=".len()..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    rest.find(quote).map(|end| rest[..end].to_owned())
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn decode_payload(encoded: &str) -> Result<String, PayloadError> {
    Ok(String::from_utf8(BASE64.decode(encoded)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kvp_lowercases_keys_and_skips_malformed_tokens() {
        let kvp = parse_kvp("Type=Bleed;LOCATION=LeftArm;garbage;payload=<x a=\"1\"/>");
        assert_eq!(kvp.get("type").unwrap(), "Bleed");
        assert_eq!(kvp.get("location").unwrap(), "LeftArm");
        assert_eq!(kvp.get("payload").unwrap(), "<x a=\"1\"/>");
        assert!(!kvp.contains_key("garbage"));
    }

    #[test]
    fn mid_extraction_handles_terminators() {
        assert_eq!(extract_mid("a=1;mid=manikin_2;b=2").unwrap(), "manikin_2");
        assert_eq!(extract_mid("mid=manikin_3").unwrap(), "manikin_3");
        assert!(extract_mid("a=1;b=2").is_none());
    }

    #[test]
    fn type_attribute_extraction_supports_both_quotes() {
        assert_eq!(
            extract_type_attr(r#"<PhysiologyModification type="Hemorrhage"/>"#).unwrap(),
            "Hemorrhage"
        );
        assert_eq!(
            extract_type_attr("<RenderModification type='TOURNIQUET'/>").unwrap(),
            "TOURNIQUET"
        );
        assert!(extract_type_attr("<x/>").is_none());
        assert!(extract_type_attr("type=Hemorrhage").is_none());
    }

    #[test]
    fn quoted_participants_are_unwrapped() {
        assert_eq!(strip_quotes("\"Jane Doe\""), "Jane Doe");
        assert_eq!(strip_quotes("Jane"), "Jane");
    }

    #[test]
    fn base64_round_trip() {
        let xml = "<AMMModuleConfiguration><module name=\"x\"/></AMMModuleConfiguration>";
        let encoded = BASE64.encode(xml);
        assert_eq!(decode_payload(&encoded).unwrap(), xml);
        assert!(decode_payload("not-base64!!!").is_err());
    }
}
