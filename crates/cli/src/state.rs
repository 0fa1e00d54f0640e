//! The CLI's state file and the engine wired on top of it.
//!
//! One JSON document holds everything a process needs to pick up where the
//! last one stopped: the storage dump, the registered descriptors and the
//! simulated VIM's live resource views. A missing file is an empty state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vnflcm_engine::{
    read_engine_config, Coordinator, DriverRegistry, EngineConfig, LogNotifier, Notifier,
    NotifierSet, SimulatedDriver, StaticDescriptorProvider, Vnfd, WebhookNotifier,
};
use vnflcm_model::InstantiatedVnfInfo;
use vnflcm_storage::{MemoryStorage, StorageDump};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StateFile {
    #[serde(default)]
    pub storage: StorageDump,
    #[serde(default)]
    pub descriptors: Vec<Vnfd>,
    /// Live resource views of the simulated VIM, per instance.
    #[serde(default)]
    pub live: BTreeMap<String, InstantiatedVnfInfo>,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<StateFile, String> {
        if !path.exists() {
            return Ok(StateFile::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("error reading state file '{}': {}", path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("error parsing state file '{}': {}", path.display(), e))
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("serialization error: {}", e))?;
        std::fs::write(path, content)
            .map_err(|e| format!("error writing state file '{}': {}", path.display(), e))
    }

    /// Add or replace a descriptor by id.
    pub fn register_descriptor(&mut self, vnfd: Vnfd) {
        self.descriptors.retain(|d| d.vnfd_id != vnfd.vnfd_id);
        self.descriptors.push(vnfd);
    }
}

/// Engine configuration from `--config`, or the defaults.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    read_engine_config(path).map_err(|e| e.to_string())
}

/// A coordinator over the loaded state. [`Workspace::save`] writes the
/// state back.
pub(crate) struct Workspace {
    pub coordinator: Coordinator<MemoryStorage>,
    pub driver: SimulatedDriver,
    descriptors: Vec<Vnfd>,
    path: PathBuf,
}

impl Workspace {
    pub fn open(state_path: &Path, config: EngineConfig) -> Result<Workspace, String> {
        let state = StateFile::load(state_path)?;
        let driver = SimulatedDriver::new();
        driver.import(state.live);

        let mut notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if !config.notification.callback_uris.is_empty() {
            notifiers.push(Arc::new(WebhookNotifier::new(
                config.notification.callback_uris.clone(),
            )));
        }

        let coordinator = Coordinator::new(
            Arc::new(MemoryStorage::restore(state.storage)),
            Arc::new(StaticDescriptorProvider::new(state.descriptors.clone())),
            DriverRegistry::uniform(Arc::new(driver.clone())),
            Arc::new(NotifierSet::new(notifiers)),
            config,
        )
        .map_err(|e| e.to_string())?;
        Ok(Workspace {
            coordinator,
            driver,
            descriptors: state.descriptors,
            path: state_path.to_path_buf(),
        })
    }

    pub fn save(&self) -> Result<(), String> {
        let state = StateFile {
            storage: self.coordinator.storage().dump().map_err(|e| e.to_string())?,
            descriptors: self.descriptors.clone(),
            live: self.driver.export(),
        };
        state.save(&self.path)
    }
}
