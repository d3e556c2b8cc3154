//! The pod: every manikin this process fronts, keyed by id.
//!
//! Built once at startup and never mutated afterwards.  Routing falls back
//! to the default manikin when a message names no (or an unknown) `mid=`.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, trace};

use sim_bus::Broker;

use crate::config::BridgeOptions;
use crate::manikin::Manikin;
use crate::parser;
use crate::registry::{ConnectionTable, SessionRegistry};
use crate::supervisor::Supervisor;

pub struct Pod {
    manikins: BTreeMap<String, Arc<Manikin>>,
    default_id: String,
}

impl Pod {
    /// Create every configured manikin eagerly.
    pub async fn initialize(
        options: &BridgeOptions,
        broker: &Arc<Broker>,
        registry: &Arc<SessionRegistry>,
        records: &Arc<ConnectionTable>,
        supervisor: &Arc<dyn Supervisor>,
    ) -> Pod {
        let mut manikins = BTreeMap::new();
        for manikin_id in options.manikin_ids() {
            let manikin = Manikin::spawn(
                &manikin_id,
                options,
                broker,
                Arc::clone(registry),
                Arc::clone(records),
                Arc::clone(supervisor),
            )
            .await;
            manikins.insert(manikin_id.clone(), manikin);
            info!(manikin = %manikin_id, "manikin ready");
        }
        Pod {
            manikins,
            default_id: options.default_manikin_id().to_owned(),
        }
    }

    pub fn get(&self, manikin_id: &str) -> Option<&Arc<Manikin>> {
        self.manikins.get(manikin_id)
    }

    /// The routing fallback target.  The pod is never built empty, so the
    /// default id always resolves.
    pub fn default_manikin(&self) -> &Arc<Manikin> {
        self.manikins
            .get(&self.default_id)
            .or_else(|| self.manikins.values().next())
            .expect("pod is never empty")
    }

    /// Resolve a `mid=` selector, falling back to the default manikin.
    pub fn for_mid(&self, mid: &str) -> &Arc<Manikin> {
        match self.manikins.get(mid) {
            Some(manikin) => manikin,
            None => {
                trace!(mid, "unknown manikin id, using default");
                self.default_manikin()
            }
        }
    }

    /// Route a whole message by its embedded `mid=` selector.
    pub fn for_line(&self, line: &str) -> &Arc<Manikin> {
        match parser::extract_mid(line) {
            Some(mid) => self.for_mid(&mid),
            None => self.default_manikin(),
        }
    }

    pub fn manikins(&self) -> impl Iterator<Item = &Arc<Manikin>> {
        self.manikins.values()
    }

    pub fn len(&self) -> usize {
        self.manikins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manikins.is_empty()
    }
}
