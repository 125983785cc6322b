use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::{Ingress, IngressConfig, IngressContext};
use crate::error::{BrightError, Result};

const CONFIG_FILE: &str = "ingresses.json";

/// Builds an ingress instance from its persisted configuration
pub type IngressFactory =
    Box<dyn Fn(IngressConfig, IngressContext) -> Result<Arc<dyn Ingress>> + Send + Sync>;

/// Owns every ingress instance: registry, persistence and lifecycle.
pub struct IngressManager {
    ingresses: RwLock<HashMap<String, Arc<dyn Ingress>>>,
    configs: RwLock<HashMap<String, IngressConfig>>,
    factories: RwLock<HashMap<String, IngressFactory>>,
    ctx: IngressContext,
    config_file: PathBuf,
}

impl IngressManager {
    pub fn new(data_dir: impl Into<PathBuf>, ctx: IngressContext) -> Self {
        Self {
            ingresses: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            ctx,
            config_file: data_dir.into().join(CONFIG_FILE),
        }
    }

    /// Register a factory for an ingress type. A new type is one factory;
    /// nothing else in the core changes.
    pub fn register_factory(&self, kind: impl Into<String>, factory: IngressFactory) {
        self.factories.write().insert(kind.into(), factory);
    }

    /// Load persisted configurations and instantiate their ingresses.
    /// Unknown types and broken configs are skipped with a log line.
    pub fn load(&self) -> Result<()> {
        let configs: HashMap<String, IngressConfig> = match std::fs::read(&self.config_file) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let factories = self.factories.read();
        let mut ingresses = self.ingresses.write();
        for (id, config) in &configs {
            let Some(factory) = factories.get(&config.kind) else {
                warn!(id = %id, kind = %config.kind, "unknown ingress type, skipping");
                continue;
            };

            match factory(config.clone(), self.ctx.clone()) {
                Ok(ingress) => {
                    ingresses.insert(id.clone(), ingress);
                }
                Err(e) => {
                    error!(id = %id, error = %e, "failed to create ingress");
                }
            }
        }
        drop(ingresses);
        drop(factories);

        *self.configs.write() = configs;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let configs = self.configs.read();
        let data = serde_json::to_vec_pretty(&*configs)?;
        drop(configs);

        let tmp = self.config_file.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.config_file)?;
        Ok(())
    }

    /// Create and persist a new ingress. The target index must exist.
    pub fn create(
        &self,
        index_id: &str,
        kind: &str,
        id: &str,
        raw_config: serde_json::Value,
    ) -> Result<Arc<dyn Ingress>> {
        if self.ingresses.read().contains_key(id) {
            return Err(BrightError::IngressAlreadyExists(id.to_string()));
        }
        if !self.ctx.store.index_exists(index_id) {
            return Err(BrightError::IndexNotFound(index_id.to_string()));
        }

        let config = IngressConfig {
            id: id.to_string(),
            index_id: index_id.to_string(),
            kind: kind.to_string(),
            config: raw_config,
        };

        let ingress = {
            let factories = self.factories.read();
            let factory = factories
                .get(kind)
                .ok_or_else(|| BrightError::UnknownIngressType(kind.to_string()))?;
            factory(config.clone(), self.ctx.clone())?
        };

        self.ingresses
            .write()
            .insert(id.to_string(), Arc::clone(&ingress));
        self.configs.write().insert(id.to_string(), config);

        if let Err(e) = self.save() {
            error!(error = %e, "failed to save ingress config");
        }

        Ok(ingress)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Ingress>> {
        self.ingresses
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BrightError::IngressNotFound(id.to_string()))
    }

    /// All ingresses targeting one index
    pub fn list(&self, index_id: &str) -> Vec<Arc<dyn Ingress>> {
        self.ingresses
            .read()
            .values()
            .filter(|ingress| ingress.index_id() == index_id)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Arc<dyn Ingress>> {
        self.ingresses.read().values().cloned().collect()
    }

    /// Stop and remove an ingress
    pub async fn delete(&self, id: &str) -> Result<()> {
        let ingress = self.get(id)?;

        if let Err(e) = ingress.stop().await {
            warn!(id = %id, error = %e, "error stopping ingress during delete");
        }
        if let Err(e) = ingress.teardown().await {
            warn!(id = %id, error = %e, "error tearing down ingress during delete");
        }

        self.ingresses.write().remove(id);
        self.configs.write().remove(id);

        if let Err(e) = self.save() {
            error!(error = %e, "failed to save ingress config");
        }

        Ok(())
    }

    /// Start every loaded ingress, reporting the first failure
    pub async fn start_all(&self) -> Result<()> {
        let ingresses = self.list_all();

        let mut first_err = None;
        for ingress in ingresses {
            let id = ingress.id().to_string();
            if let Err(e) = Arc::clone(&ingress).start().await {
                error!(id = %id, error = %e, "failed to start ingress");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop every ingress, awaiting task completion
    pub async fn stop_all(&self) {
        for ingress in self.list_all() {
            if let Err(e) = ingress.stop().await {
                error!(id = %ingress.id(), error = %e, "failed to stop ingress");
            }
        }
        info!("all ingresses stopped");
    }
}
