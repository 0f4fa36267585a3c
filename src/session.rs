//! Explicit session store: one analysis engine per session id.
//!
//! Conversation memory and feedback history live inside the engine, so they
//! are retrievable by session id for the session's lifetime and disappear
//! with `remove`.

use crate::config::EngineConfig;
use crate::engine::AnalysisEngine;
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

pub struct SessionManager {
    config: EngineConfig,
    sessions: RwLock<HashMap<String, Arc<AnalysisEngine>>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session, replacing any existing engine under the same id.
    pub fn create(&self, session_id: &str) -> Arc<AnalysisEngine> {
        let engine = Arc::new(AnalysisEngine::new(self.config.clone()));
        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(session_id.to_string(), Arc::clone(&engine));
        info!(session_id, "created session");
        engine
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<AnalysisEngine>> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("session '{session_id}'")))
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<AnalysisEngine> {
        if let Ok(engine) = self.get(session_id) {
            return engine;
        }
        self.create(session_id)
    }

    /// Teardown: drops the engine and with it the session's memory and
    /// feedback state.
    pub fn remove(&self, session_id: &str) -> Result<()> {
        let removed = self
            .sessions
            .write()
            .expect("session lock poisoned")
            .remove(session_id);
        match removed {
            Some(_) => {
                info!(session_id, "removed session");
                Ok(())
            }
            None => Err(EngineError::NotFound(format!("session '{session_id}'"))),
        }
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .expect("session lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_isolated_and_removable() {
        let manager = SessionManager::new(EngineConfig::default());
        let a = manager.get_or_create("a");
        let b = manager.get_or_create("b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(manager.session_ids(), vec!["a", "b"]);

        manager.remove("a").unwrap();
        assert!(manager.get("a").is_err());
        assert!(manager.remove("a").is_err());
        assert!(manager.get("b").is_ok());
    }

    #[test]
    fn get_or_create_reuses_live_sessions() {
        let manager = SessionManager::new(EngineConfig::default());
        let first = manager.get_or_create("s");
        let again = manager.get_or_create("s");
        assert!(Arc::ptr_eq(&first, &again));
    }
}
