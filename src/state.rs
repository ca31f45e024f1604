use crate::config::Config;
use crate::refresh::RefreshCoordinator;
use crate::upstream::SharedEngine;
use std::collections::HashMap;

pub struct AppState {
    pub config: Config,
    pub coordinator: RefreshCoordinator,
    /// metric name → engine computing it
    pub engines: HashMap<String, SharedEngine>,
}

impl AppState {
    pub fn new(config: Config, coordinator: RefreshCoordinator) -> Self {
        Self {
            config,
            coordinator,
            engines: HashMap::new(),
        }
    }

    pub fn with_engine(mut self, metric: &str, engine: SharedEngine) -> Self {
        self.engines.insert(metric.to_string(), engine);
        self
    }

    pub fn engine(&self, metric: &str) -> Option<SharedEngine> {
        self.engines.get(metric).cloned()
    }

    pub fn metric_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
