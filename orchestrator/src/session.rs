//! Per-user, per-interface conversational context.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::intent::IntentKind;

const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub interface_type: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_intent: Option<IntentKind>,
    pub last_parameters: Map<String, Value>,
    pub last_used_service: Option<String>,
    pub variables: Map<String, Value>,
    pub history: VecDeque<(String, String)>,
}

impl SessionContext {
    fn new(user_id: &str, interface_type: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            interface_type: interface_type.to_string(),
            created_at: now,
            last_activity: now,
            last_intent: None,
            last_parameters: Map::new(),
            last_used_service: None,
            variables: Map::new(),
            history: VecDeque::new(),
        }
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionContext>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn create_session(&self, user_id: &str, interface_type: &str) -> String {
        let session = SessionContext::new(user_id, interface_type);
        let id = session.session_id.clone();
        debug!(session = %id, user = %user_id, %interface_type, "session created");
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(id.clone(), session);
        id
    }

    /// Fetch a session, refreshing its activity timestamp.
    pub fn touch(&self, session_id: &str) -> Option<SessionContext> {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let session = sessions.get_mut(session_id)?;
        session.last_activity = Utc::now();
        Some(session.clone())
    }

    pub fn get(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(session_id)
            .cloned()
    }

    /// Record the outcome of a routed command for follow-up resolution.
    pub fn record_command(
        &self,
        session_id: &str,
        intent: IntentKind,
        parameters: &Map<String, Value>,
        service: Option<&str>,
    ) {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_intent = Some(intent);
            session.last_parameters = parameters.clone();
            if let Some(service) = service {
                session.last_used_service = Some(service.to_string());
            }
            session.last_activity = Utc::now();
        }
    }

    pub fn add_history(&self, session_id: &str, input: &str, response: &str) {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        if let Some(session) = sessions.get_mut(session_id) {
            session
                .history
                .push_back((input.to_string(), response.to_string()));
            while session.history.len() > HISTORY_LIMIT {
                session.history.pop_front();
            }
        }
    }

    pub fn set_variable(&self, session_id: &str, key: &str, value: Value) -> bool {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.variables.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Drop sessions idle past the TTL; returns how many went away.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| now - s.last_activity > ttl)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired sessions evicted");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background sweep over idle sessions.
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.cleanup_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_touch_and_record() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.create_session("alice", "web");
        let session = manager.touch(&id).expect("session exists");
        assert_eq!(session.user_id, "alice");
        assert!(session.last_intent.is_none());

        let mut params = Map::new();
        params.insert("action".into(), json!("play"));
        manager.record_command(&id, IntentKind::AudioControl, &params, Some("ai-audio-assistant"));
        let session = manager.get(&id).unwrap();
        assert_eq!(session.last_intent, Some(IntentKind::AudioControl));
        assert_eq!(session.last_used_service.as_deref(), Some("ai-audio-assistant"));
    }

    #[test]
    fn history_is_bounded() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.create_session("bob", "text");
        for i in 0..60 {
            manager.add_history(&id, &format!("in {i}"), "out");
        }
        let session = manager.get(&id).unwrap();
        assert_eq!(session.history.len(), HISTORY_LIMIT);
        assert_eq!(session.history.front().unwrap().0, "in 10");
    }

    #[test]
    fn idle_sessions_expire() {
        let manager = SessionManager::new(Duration::from_millis(0));
        let id = manager.create_session("carol", "mobile");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.cleanup_expired(), 1);
        assert!(manager.get(&id).is_none());
    }

    #[test]
    fn variables_only_touch_existing_sessions() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let id = manager.create_session("dave", "web");
        assert!(manager.set_variable(&id, "zone", json!("kitchen")));
        assert!(!manager.set_variable("ghost", "zone", json!("kitchen")));
        assert_eq!(manager.get(&id).unwrap().variables["zone"], json!("kitchen"));
    }
}
