// Handler registry: job type -> handler, owned by one worker pool

use crate::port::JobHandler;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Read-mostly map guarded by its own lock; last registration wins
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        handlers.get(job_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
