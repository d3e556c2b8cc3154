//! XML document parsing for module declarations.
//!
//! Three wire documents share the `AMMModuleConfiguration` shape: the
//! capability announcement, later settings updates, and the bridge's own
//! static configuration files.  Status reports use `AMMModuleStatus`.
//! Parsing streams over the events rather than building a DOM; a malformed
//! document fails as a whole and the caller drops the offending line.

use quick_xml::Reader;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed attribute: {0}")]
    Attr(#[from] AttrError),
    #[error("missing element <{0}>")]
    MissingElement(&'static str),
    #[error("element <{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
}

/// `<module>` identity attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleIdentity {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub module_version: String,
}

/// One subscribed-topic declaration, with the optional high-frequency node
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDecl {
    pub name: String,
    pub nodepath: Option<String>,
}

impl TopicDecl {
    /// The topic name the subscription index stores.  A nodepath replaces
    /// the topic name, and high-frequency node data is tagged `HF_`.
    pub fn effective_topic(&self) -> String {
        match &self.nodepath {
            Some(nodepath) if self.name == "AMM_HighFrequencyNode_Data" => {
                format!("HF_{nodepath}")
            }
            Some(nodepath) => nodepath.clone(),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub starting_settings: Vec<(String, String)>,
    pub configuration: Vec<(String, String)>,
    pub subscribed: Vec<TopicDecl>,
    pub published: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDoc {
    pub module: ModuleIdentity,
    pub capabilities: Vec<Capability>,
}

/// Parsed `AMMModuleStatus` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDoc {
    pub module_name: String,
    pub halting: bool,
}

// ---------------------------------------------------------------------------
// Capability document parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    StartingSettings,
    Configuration,
    SubscribedTopics,
    PublishedTopics,
}

#[derive(Default)]
struct DocState {
    saw_root: bool,
    module: Option<ModuleIdentity>,
    capabilities: Vec<Capability>,
    current: Option<Capability>,
    section: Section,
}

impl Default for Section {
    fn default() -> Self {
        Section::None
    }
}

impl DocState {
    fn element(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), CapabilityError> {
        match e.name().as_ref() {
            b"AMMModuleConfiguration" => self.saw_root = true,
            b"module" => {
                self.module = Some(ModuleIdentity {
                    name: require_attr(e, "module", "name")?,
                    manufacturer: attr(e, "manufacturer")?.unwrap_or_default(),
                    model: attr(e, "model")?.unwrap_or_default(),
                    serial_number: attr(e, "serial_number")?.unwrap_or_default(),
                    module_version: attr(e, "module_version")?.unwrap_or_default(),
                });
            }
            b"capability" => {
                let cap = Capability {
                    name: require_attr(e, "capability", "name")?,
                    ..Capability::default()
                };
                // A self-closing capability has nothing more to collect.
                if empty {
                    self.capabilities.push(cap);
                } else {
                    self.current = Some(cap);
                }
            }
            b"starting_settings" if !empty => self.section = Section::StartingSettings,
            b"configuration" if !empty => self.section = Section::Configuration,
            b"subscribed_topics" if !empty => self.section = Section::SubscribedTopics,
            b"published_topics" if !empty => self.section = Section::PublishedTopics,
            b"setting" => {
                if let Some(cap) = self.current.as_mut() {
                    let name = require_attr(e, "setting", "name")?;
                    let value = attr(e, "value")?.unwrap_or_default();
                    match self.section {
                        Section::StartingSettings => cap.starting_settings.push((name, value)),
                        Section::Configuration => cap.configuration.push((name, value)),
                        _ => {}
                    }
                }
            }
            b"topic" => {
                if let Some(cap) = self.current.as_mut() {
                    let name = require_attr(e, "topic", "name")?;
                    match self.section {
                        Section::SubscribedTopics => cap.subscribed.push(TopicDecl {
                            name,
                            nodepath: attr(e, "nodepath")?,
                        }),
                        Section::PublishedTopics => cap.published.push(name),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn element_end(&mut self, name: &[u8]) {
        match name {
            b"capability" => {
                if let Some(cap) = self.current.take() {
                    self.capabilities.push(cap);
                }
            }
            b"starting_settings" | b"configuration" | b"subscribed_topics"
            | b"published_topics" => self.section = Section::None,
            _ => {}
        }
    }
}

pub fn parse_capability_doc(xml: &str) -> Result<CapabilityDoc, CapabilityError> {
    let mut reader = Reader::from_str(xml);
    let mut state = DocState::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => state.element(&e, false)?,
            Event::Empty(e) => state.element(&e, true)?,
            Event::End(e) => state.element_end(e.name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
    }

    if !state.saw_root {
        return Err(CapabilityError::MissingElement("AMMModuleConfiguration"));
    }
    let module = state.module.ok_or(CapabilityError::MissingElement("module"))?;
    Ok(CapabilityDoc {
        module,
        capabilities: state.capabilities,
    })
}

// ---------------------------------------------------------------------------
// Status document parser
// ---------------------------------------------------------------------------

pub fn parse_status_doc(xml: &str) -> Result<StatusDoc, CapabilityError> {
    let mut reader = Reader::from_str(xml);
    let mut saw_root = false;
    let mut module_name: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"AMMModuleStatus" => saw_root = true,
                b"module" => module_name = Some(require_attr(&e, "module", "name")?),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(CapabilityError::MissingElement("AMMModuleStatus"));
    }
    let module_name = module_name.ok_or(CapabilityError::MissingElement("module"))?;
    Ok(StatusDoc {
        halting: xml.contains("HALTING_ERROR"),
        module_name,
    })
}

// ---------------------------------------------------------------------------
// Attribute helpers
// ---------------------------------------------------------------------------

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, CapabilityError> {
    match e.try_get_attribute(name)? {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn require_attr(
    e: &BytesStart<'_>,
    element: &'static str,
    attribute: &'static str,
) -> Result<String, CapabilityError> {
    attr(e, attribute)?.ok_or(CapabilityError::MissingAttribute { element, attribute })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOC: &str = r#"
        <AMMModuleConfiguration>
          <module name="Vitals Monitor" manufacturer="Vcom3D" model="VM-1"
                  serial_number="0001" module_version="1.2.0">
            <capabilities>
              <capability name="vitals_display">
                <starting_settings>
                  <setting name="alarm_volume" value="3"/>
                  <setting name="sweep_speed" value="25"/>
                </starting_settings>
                <subscribed_topics>
                  <topic name="HR"/>
                  <topic name="AMM_Status"/>
                  <topic name="AMM_HighFrequencyNode_Data" nodepath="ECG"/>
                  <topic name="AMM_Generic" nodepath="Pleth"/>
                </subscribed_topics>
                <published_topics>
                  <topic name="AMM_Status"/>
                </published_topics>
              </capability>
              <capability name="nibp_cuff"/>
            </capabilities>
          </module>
        </AMMModuleConfiguration>"#;

    #[test]
    fn parses_module_identity_and_capabilities() {
        let doc = parse_capability_doc(FULL_DOC).unwrap();
        assert_eq!(doc.module.name, "Vitals Monitor");
        assert_eq!(doc.module.manufacturer, "Vcom3D");
        assert_eq!(doc.module.module_version, "1.2.0");
        assert_eq!(doc.capabilities.len(), 2);

        let cap = &doc.capabilities[0];
        assert_eq!(cap.name, "vitals_display");
        assert_eq!(
            cap.starting_settings,
            vec![
                ("alarm_volume".to_owned(), "3".to_owned()),
                ("sweep_speed".to_owned(), "25".to_owned()),
            ]
        );
        assert_eq!(cap.published, vec!["AMM_Status"]);
        assert_eq!(doc.capabilities[1].name, "nibp_cuff");
    }

    #[test]
    fn nodepath_remaps_subscribed_topics() {
        let doc = parse_capability_doc(FULL_DOC).unwrap();
        let topics: Vec<String> = doc.capabilities[0]
            .subscribed
            .iter()
            .map(TopicDecl::effective_topic)
            .collect();
        assert_eq!(topics, vec!["HR", "AMM_Status", "HF_ECG", "Pleth"]);
    }

    #[test]
    fn configuration_settings_are_collected_separately() {
        let xml = r#"
            <AMMModuleConfiguration>
              <module name="IV Pump">
                <capabilities>
                  <capability name="ivpump">
                    <configuration>
                      <setting name="rate" value="15"/>
                    </configuration>
                  </capability>
                </capabilities>
              </module>
            </AMMModuleConfiguration>"#;
        let doc = parse_capability_doc(xml).unwrap();
        assert!(doc.capabilities[0].starting_settings.is_empty());
        assert_eq!(
            doc.capabilities[0].configuration,
            vec![("rate".to_owned(), "15".to_owned())]
        );
    }

    #[test]
    fn missing_root_or_module_is_an_error() {
        assert!(matches!(
            parse_capability_doc("<NotAModule/>"),
            Err(CapabilityError::MissingElement("AMMModuleConfiguration"))
        ));
        assert!(matches!(
            parse_capability_doc("<AMMModuleConfiguration/>"),
            Err(CapabilityError::MissingElement("module"))
        ));
    }

    #[test]
    fn module_without_name_is_an_error() {
        let xml = r#"<AMMModuleConfiguration><module manufacturer="x"/></AMMModuleConfiguration>"#;
        assert!(matches!(
            parse_capability_doc(xml),
            Err(CapabilityError::MissingAttribute {
                element: "module",
                attribute: "name",
            })
        ));
    }

    #[test]
    fn status_doc_flags_halting_errors() {
        let healthy = r#"<AMMModuleStatus><module name="Ventilator"/></AMMModuleStatus>"#;
        let doc = parse_status_doc(healthy).unwrap();
        assert_eq!(doc.module_name, "Ventilator");
        assert!(!doc.halting);

        let halting = r#"<AMMModuleStatus><module name="Ventilator">HALTING_ERROR: pump jam</module></AMMModuleStatus>"#;
        assert!(parse_status_doc(halting).unwrap().halting);
    }
}
