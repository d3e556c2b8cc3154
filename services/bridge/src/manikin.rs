//! One virtual patient: its bus membership, per-client routing state and the
//! fan-out of every bus sample onto subscribed sessions.
//!
//! Each handler follows the same discipline: take what it needs from the
//! state maps under their own locks, snapshot the recipient sessions, drop
//! every lock, then write.  Socket I/O never happens while state is locked.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sim_bus::{
    Assessment, Broker, BusEvent, Command, EventRecord, InstrumentData, ModuleConfiguration,
    OmittedEvent, OperationalDescription, PhysiologyModification, PhysiologyValue,
    PhysiologyWaveform, RenderModification, SimulationControl, Status, Topic, generate_uuid,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilityError, parse_capability_doc, parse_status_doc};
use crate::commands;
use crate::config::{BridgeOptions, read_module_document};
use crate::events::EventRecordCache;
use crate::labs::LabPanels;
use crate::registry::{ConnectionTable, SessionHandle, SessionRegistry};
use crate::subscriptions::{EquipmentSettings, SubscriptionIndex};
use crate::supervisor::Supervisor;

/// Name this bridge reports for itself on the bus.
const MODULE_NAME: &str = "AMM_TCP_Bridge";

/// Grace period after joining the bus so discovery can complete.
const SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Simulation lifecycle state, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    NotRunning,
    Running,
    Paused,
}

impl SimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SimStatus::NotRunning => "NOT RUNNING",
            SimStatus::Running => "RUNNING",
            SimStatus::Paused => "PAUSED",
        }
    }
}

/// The status triple plus the paused latch that disambiguates HALT.
struct SimState {
    status: SimStatus,
    scenario: String,
    state: String,
    paused: bool,
}

pub struct Manikin {
    id: String,
    module_id: String,
    options: BridgeOptions,
    participant: sim_bus::Participant,
    registry: Arc<SessionRegistry>,
    records: Arc<ConnectionTable>,
    supervisor: Arc<dyn Supervisor>,
    subscriptions: SubscriptionIndex,
    equipment: EquipmentSettings,
    events: EventRecordCache,
    labs: LabPanels,
    sim: Mutex<SimState>,
}

impl Manikin {
    /// Join the bus, wire up every subscription and start the pump task.
    pub async fn spawn(
        manikin_id: &str,
        options: &BridgeOptions,
        broker: &Arc<Broker>,
        registry: Arc<SessionRegistry>,
        records: Arc<ConnectionTable>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Arc<Manikin> {
        info!(manikin = manikin_id, pod_mode = options.pod_mode, "initializing manikin");

        let participant = broker.participant(format!("{}/{}", options.core_id, manikin_id));
        let inbound = participant.subscribe(&Topic::ALL);

        let manikin = Arc::new(Manikin {
            id: manikin_id.to_owned(),
            module_id: generate_uuid(),
            options: options.clone(),
            participant,
            registry,
            records,
            supervisor,
            subscriptions: SubscriptionIndex::new(),
            equipment: EquipmentSettings::new(),
            events: EventRecordCache::new(),
            labs: LabPanels::new(),
            sim: Mutex::new(SimState {
                status: SimStatus::NotRunning,
                scenario: String::new(),
                state: String::new(),
                paused: false,
            }),
        });

        let pump = Arc::clone(&manikin);
        tokio::spawn(pump.run(inbound));

        tokio::time::sleep(SETTLE_DELAY).await;
        manikin
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub(crate) fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn records(&self) -> &ConnectionTable {
        &self.records
    }

    pub(crate) fn supervisor(&self) -> &dyn Supervisor {
        &*self.supervisor
    }

    /// Whether `session_id` currently subscribes to `topic` on this manikin.
    pub fn is_session_subscribed(&self, session_id: &str, topic: &str) -> bool {
        self.subscriptions.is_subscribed(session_id, topic)
    }

    /// Session ids keyed in this manikin's subscription index.
    pub fn subscribed_session_ids(&self) -> Vec<String> {
        self.subscriptions.session_ids()
    }

    /// Drop a departed session from the routing state.
    pub fn forget_session(&self, session_id: &str) {
        self.subscriptions.forget_session(session_id);
    }

    // -----------------------------------------------------------------------
    // Bus event pump
    // -----------------------------------------------------------------------

    async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<BusEvent>) {
        while let Some(event) = inbound.recv().await {
            self.on_event(event).await;
        }
        debug!(manikin = %self.id, "bus pump stopped");
    }

    async fn on_event(&self, event: BusEvent) {
        match event {
            BusEvent::Status(st) => self.on_status(st).await,
            BusEvent::ModuleConfiguration(mc) => self.on_module_configuration(mc).await,
            BusEvent::PhysiologyValue(pv) => self.on_physiology_value(pv).await,
            BusEvent::PhysiologyWaveform(wf) => self.on_physiology_waveform(wf).await,
            BusEvent::PhysiologyModification(pm) => self.on_physiology_modification(pm).await,
            BusEvent::RenderModification(rm) => self.on_render_modification(rm).await,
            BusEvent::Assessment(a) => self.on_assessment(a, Topic::Assessment).await,
            BusEvent::PerformanceAssessment(a) => {
                self.on_assessment(a, Topic::PerformanceAssessment).await;
            }
            BusEvent::EventRecord(er) => self.on_event_record(er).await,
            BusEvent::OmittedEvent(oe) => self.on_omitted_event(oe).await,
            BusEvent::OperationalDescription(od) => self.on_operational_description(od).await,
            BusEvent::SimulationControl(sc) => self.on_simulation_control(sc).await,
            BusEvent::Command(c) => commands::handle_command(self, &c.message).await,
            // The bridge only produces instrument data; nothing to fan out.
            BusEvent::InstrumentData(_) => {}
        }
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    pub(crate) fn publish(&self, event: BusEvent) {
        let topic = event.topic();
        if let Err(e) = self.participant.publish(event) {
            error!(manikin = %self.id, topic = %topic, error = %e, "bus publish failed");
        }
    }

    pub(crate) fn publish_command_message(&self, message: impl Into<String>) {
        self.publish(BusEvent::Command(Command {
            message: message.into(),
        }));
    }

    pub(crate) fn publish_simulation_control(&self, control_type: sim_bus::ControlType) {
        self.publish(BusEvent::SimulationControl(SimulationControl {
            control_type,
            timestamp_ms: now_ms(),
        }));
    }

    /// Publish the bridge's own description, embedding the capability schema
    /// shipped alongside the binary.
    pub fn publish_operational_description(&self) {
        let schema = read_module_document(&self.options.capabilities_schema_path());
        self.publish(BusEvent::OperationalDescription(OperationalDescription {
            name: MODULE_NAME.to_owned(),
            description: "TCP Bridge".to_owned(),
            manufacturer: "Vcom3D".to_owned(),
            model: "TCP Bridge".to_owned(),
            serial_number: "1.0.0".to_owned(),
            module_id: self.module_id.clone(),
            module_version: "1.0.0".to_owned(),
            configuration_version: String::new(),
            amm_version: String::new(),
            capabilities_schema: schema,
        }));
    }

    /// Publish the bridge's own module configuration document.
    pub fn publish_configuration(&self) {
        let configuration = read_module_document(&self.options.module_configuration_path());
        self.publish(BusEvent::ModuleConfiguration(ModuleConfiguration {
            module_id: self.module_id.clone(),
            name: MODULE_NAME.to_owned(),
            capabilities_configuration: configuration,
            timestamp_ms: now_ms(),
        }));
    }

    fn publish_settings(&self, capability: &str) {
        let Some(payload) = self.equipment.payload_for(capability) else {
            return;
        };
        info!(manikin = %self.id, capability, "publishing equipment settings");
        self.publish(BusEvent::InstrumentData(InstrumentData {
            instrument: capability.to_owned(),
            payload,
        }));
    }

    // -----------------------------------------------------------------------
    // Client document handling
    // -----------------------------------------------------------------------

    /// Process a decoded capability announcement from `session_id`.
    pub fn handle_capabilities(&self, session_id: &str, xml: &str) -> Result<(), CapabilityError> {
        let doc = parse_capability_doc(xml)?;
        let module_name = doc.module.name.clone();

        self.publish(BusEvent::OperationalDescription(OperationalDescription {
            name: doc.module.name.clone(),
            manufacturer: doc.module.manufacturer.clone(),
            model: doc.module.model.clone(),
            serial_number: doc.module.serial_number.clone(),
            module_version: doc.module.module_version.clone(),
            capabilities_schema: xml.to_owned(),
            ..OperationalDescription::default()
        }));

        self.registry.set_client_type(session_id, &module_name);
        self.records.update(session_id, |record| {
            record.client_type = module_name.clone();
        });

        // A fresh capability document replaces whatever was subscribed.
        self.subscriptions.clear_session(session_id);

        for cap in &doc.capabilities {
            if !cap.starting_settings.is_empty() {
                self.equipment.merge(&cap.name, &cap.starting_settings);
                self.publish_settings(&cap.name);
            }
            for decl in &cap.subscribed {
                self.subscriptions
                    .subscribe(session_id, &decl.effective_topic());
            }
            for topic in &cap.published {
                self.subscriptions.record_published(session_id, topic);
            }
        }
        info!(
            manikin = %self.id,
            session = session_id,
            module = %module_name,
            capabilities = doc.capabilities.len(),
            "capabilities registered"
        );
        Ok(())
    }

    /// Process a decoded settings update: merge configuration values and
    /// republish the touched capabilities.
    pub fn handle_settings(&self, session_id: &str, xml: &str) -> Result<(), CapabilityError> {
        let doc = parse_capability_doc(xml)?;
        for cap in &doc.capabilities {
            if cap.configuration.is_empty() {
                continue;
            }
            self.equipment.merge(&cap.name, &cap.configuration);
            self.publish_settings(&cap.name);
        }
        debug!(manikin = %self.id, session = session_id, "settings merged");
        Ok(())
    }

    /// Process a decoded module status report into a bus status sample.
    pub fn handle_status(&self, session_id: &str, xml: &str) -> Result<(), CapabilityError> {
        let doc = parse_status_doc(xml)?;
        let value = if doc.halting {
            sim_bus::StatusValue::Inoperative
        } else {
            sim_bus::StatusValue::Operational
        };
        debug!(manikin = %self.id, session = session_id, module = %doc.module_name, ?value, "module status");
        self.publish(BusEvent::Status(Status {
            module_id: self.module_id.clone(),
            module_name: String::new(),
            capability: doc.module_name,
            value,
            message: String::new(),
        }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Client requests
    // -----------------------------------------------------------------------

    /// `REQUEST=` handling: STATUS, CLIENTS, LABS[;panel].
    pub async fn dispatch_request(&self, session: &SessionHandle, request: &str) {
        if request.starts_with("STATUS") {
            let (status, scenario, state) = {
                let sim = self.sim.lock().unwrap();
                (sim.status, sim.scenario.clone(), sim.state.clone())
            };
            session
                .send(format!(
                    "STATUS={}|SCENARIO={scenario}|STATE={state}|",
                    status.as_str()
                ))
                .await;
        } else if request.starts_with("CLIENTS") {
            debug!(manikin = %self.id, "client table request");
            session.send(self.records.to_csv()).await;
        } else if request.starts_with("LABS") {
            let panel = request
                .split(';')
                .skip(1)
                .find(|segment| !segment.is_empty() && !segment.starts_with("mid="))
                .unwrap_or("ALL");
            debug!(manikin = %self.id, panel, "lab values request");
            let Some(values) = self.labs.panel(panel) else {
                warn!(manikin = %self.id, panel, "no lab values for panel");
                return;
            };
            for (name, value) in values {
                session
                    .send(format!("{name}={value};mid={}|\n", self.id))
                    .await;
            }
        } else {
            warn!(manikin = %self.id, request, "unknown request type");
        }
    }

    /// Push a scenario's static configuration file to one session.
    pub async fn send_scenario_config(
        &self,
        session: &SessionHandle,
        scenario: &str,
        client_type: &str,
    ) {
        let path = self.options.scenario_config_path(scenario, client_type);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "no static configuration for this scenario and client type"
                );
                return;
            }
        };
        debug!(session = %session.id, path = %path.display(), "sending scenario configuration");
        session
            .send(format!("CONFIG={}\n", BASE64.encode(content)))
            .await;
    }

    /// Push the scenario configuration to every session with a declared type.
    pub async fn send_scenario_config_to_all(&self, scenario: &str) {
        for handle in self.registry.snapshot() {
            match self.registry.client_type(&handle.id) {
                Some(client_type) if !client_type.is_empty() => {
                    self.send_scenario_config(&handle, scenario, &client_type)
                        .await;
                }
                _ => debug!(session = %handle.id, "session has no client type, skipping config"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Simulation state
    // -----------------------------------------------------------------------

    pub(crate) fn set_sim_status(&self, status: SimStatus, paused: bool) {
        let mut sim = self.sim.lock().unwrap();
        sim.status = status;
        sim.paused = paused;
    }

    pub(crate) fn set_scenario(&self, scenario: &str) {
        self.sim.lock().unwrap().scenario = scenario.to_owned();
    }

    pub(crate) fn set_state(&self, state: &str) {
        self.sim.lock().unwrap().state = state.to_owned();
    }

    pub fn sim_status(&self) -> SimStatus {
        self.sim.lock().unwrap().status
    }

    pub(crate) fn reset_labs(&self) {
        self.labs.reset();
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    fn mid_suffix(&self) -> String {
        if self.options.pod_mode {
            format!(";mid={}", self.id)
        } else {
            String::new()
        }
    }

    /// Snapshot the sessions subscribed to any of `topics`.
    fn recipients(&self, topics: &[&str]) -> Vec<SessionHandle> {
        self.subscriptions
            .sessions_matching(topics)
            .into_iter()
            .filter_map(|id| self.registry.resolve(&id))
            .collect()
    }

    async fn fan_out(&self, topics: &[&str], line: &str) {
        for handle in self.recipients(topics) {
            handle.send(line).await;
        }
    }

    async fn on_status(&self, st: Status) {
        debug!(
            manikin = %self.id,
            module = %st.module_name,
            capability = %st.capability,
            status = st.value.as_str(),
            "status sample"
        );
        let line = format!(
            "[AMM_Status]mid={};capability={};status_code={};status={};data={}\n",
            self.id,
            st.capability,
            st.value.as_str(),
            st.value.code(),
            st.message,
        );
        self.fan_out(&[Topic::Status.as_str()], &line).await;
    }

    async fn on_module_configuration(&self, mc: ModuleConfiguration) {
        debug!(manikin = %self.id, config = %mc.name, "module configuration sample");
        // Routed by declared client type, not by subscription: a config named
        // "metadata" goes to every typed session.
        let recipients: Vec<SessionHandle> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|handle| {
                self.registry
                    .client_type(&handle.id)
                    .is_some_and(|client_type| {
                        !client_type.is_empty()
                            && (client_type.contains(mc.name.as_str()) || mc.name == "metadata")
                    })
            })
            .collect();

        let line = format!(
            "CONFIG={};mid={}\n",
            BASE64.encode(&mc.capabilities_configuration),
            self.id
        );
        for handle in recipients {
            handle.send(line.clone()).await;
        }
    }

    async fn on_physiology_value(&self, pv: PhysiologyValue) {
        self.labs.observe(&pv.name, pv.value);
        let line = format!("{}={}{}|\n", pv.name, pv.value, self.mid_suffix());
        self.fan_out(&[pv.name.as_str()], &line).await;
    }

    async fn on_physiology_waveform(&self, wf: PhysiologyWaveform) {
        let hf_topic = format!("HF_{}", wf.name);
        let line = format!("{}={}{}|\n", wf.name, wf.value, self.mid_suffix());
        self.fan_out(&[hf_topic.as_str()], &line).await;
    }

    async fn on_physiology_modification(&self, pm: PhysiologyModification) {
        let correlation = self.events.correlate(&pm.event_id);
        let line = format!(
            "[AMM_Physiology_Modification]id={};mid={};event_id={};type={};location={};participant_id={};payload={}\n",
            pm.id,
            self.id,
            pm.event_id,
            pm.mod_type,
            correlation.location,
            correlation.participant_id,
            pm.data,
        );
        debug!(manikin = %self.id, mod_type = %pm.mod_type, "physiology modification to clients");
        self.fan_out(
            &[pm.mod_type.as_str(), Topic::PhysiologyModification.as_str()],
            &line,
        )
        .await;
    }

    async fn on_render_modification(&self, rm: RenderModification) {
        let correlation = self.events.correlate(&rm.event_id);

        if rm.data.contains("CHOSE_ROLE") {
            self.assign_role(&correlation.participant_id);
        }

        let payload = if rm.data.is_empty() {
            format!("<RenderModification type='{}'/>", rm.mod_type)
        } else {
            rm.data.clone()
        };
        // The type travels inside the payload; the envelope field stays empty.
        let line = format!(
            "[AMM_Render_Modification]id={};mid={};event_id={};type=;location={};participant_id={};payload={}\n",
            rm.id, self.id, rm.event_id, correlation.location, correlation.participant_id, payload,
        );
        if !payload.contains("START_OF") {
            info!(manikin = %self.id, mod_type = %rm.mod_type, "render modification to clients");
        }
        self.fan_out(&[rm.mod_type.as_str(), Topic::RenderModification.as_str()], &line)
            .await;
    }

    /// A `CHOSE_ROLE` participant string is `role:client_id:learner_name`;
    /// fold it into the connection record and announce the update.
    fn assign_role(&self, participant: &str) {
        let parts: Vec<&str> = participant.split(':').collect();
        if parts.len() < 3 {
            warn!(participant, "malformed role assignment");
            return;
        }
        let (role, client_id, learner) = (parts[0], parts[1], parts[2]);
        info!(client = client_id, role, "role chosen");
        let record = self.records.update(client_id, |record| {
            record.role = role.to_owned();
            record.learner_name = learner.to_owned();
        });
        self.publish_command_message(record.to_sys_update());
    }

    async fn on_assessment(&self, a: Assessment, topic: Topic) {
        let correlation = self.events.correlate(&a.event_id);
        let line = format!(
            "[{}]id={};mid={};event_id={};type={};location={};participant_id={};value={};comment={}\n",
            topic.as_str(),
            a.id,
            self.id,
            a.event_id,
            correlation.event_type,
            correlation.location,
            correlation.participant_id,
            a.value.as_str(),
            a.comment,
        );
        debug!(manikin = %self.id, "assessment to clients");
        self.fan_out(&[topic.as_str()], &line).await;
    }

    async fn on_event_record(&self, er: EventRecord) {
        debug!(manikin = %self.id, event_type = %er.event_type, "event record");
        self.events.store(er.clone());
        let line = format!(
            "[AMM_EventRecord]id={};mid={};type={};location={};participant_id={};participant_type={};data={};\n",
            er.id, self.id, er.event_type, er.location.name, er.agent_id, er.agent_type, er.data,
        );
        self.fan_out(&[Topic::EventRecord.as_str()], &line).await;
    }

    async fn on_omitted_event(&self, oe: OmittedEvent) {
        let er = oe.into_event_record();
        debug!(manikin = %self.id, event_type = %er.event_type, "omitted event record");
        self.events.store(er.clone());
        let line = format!(
            "[AMM_OmittedEvent]id={};mid={};type={};location={};participant_id={};participant_type={};data={};\n",
            er.id, self.id, er.event_type, er.location.name, er.agent_id, er.agent_type, er.data,
        );
        self.fan_out(&[Topic::EventRecord.as_str()], &line).await;
    }

    async fn on_operational_description(&self, od: OperationalDescription) {
        info!(manikin = %self.id, module = %od.name, "operational description");
        let line = format!(
            "[AMM_OperationalDescription]name={};mid={};description={};manufacturer={};model={};serial_number={};module_id={};module_version={};configuration_version={};AMM_version={};capabilities_configuration={}\n",
            od.name,
            self.id,
            od.description,
            od.manufacturer,
            od.model,
            od.serial_number,
            od.module_id,
            od.module_version,
            od.configuration_version,
            od.amm_version,
            BASE64.encode(&od.capabilities_schema),
        );
        self.fan_out(&[Topic::OperationalDescription.as_str()], &line)
            .await;
    }

    async fn on_simulation_control(&self, sc: SimulationControl) {
        info!(manikin = %self.id, control = ?sc.control_type, "simulation control");
        let announcement = match sc.control_type {
            sim_bus::ControlType::Run => {
                self.set_sim_status(SimStatus::Running, false);
                "[SYS]START_SIM"
            }
            sim_bus::ControlType::Halt => {
                let was_paused = self.sim.lock().unwrap().paused;
                let status = if was_paused {
                    SimStatus::Paused
                } else {
                    SimStatus::NotRunning
                };
                self.set_sim_status(status, true);
                "[SYS]PAUSE_SIM"
            }
            sim_bus::ControlType::Reset => {
                self.set_sim_status(SimStatus::NotRunning, false);
                self.labs.reset();
                "[SYS]RESET_SIM"
            }
            sim_bus::ControlType::Save => return,
        };
        self.registry
            .broadcast(&format!("{announcement};mid={}\n", self.id))
            .await;
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
