//! Session registry: creation quotas, alias resolution, idle/TTL reaping,
//! graceful shutdown.

use crate::constants::session as session_constants;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::ssh::session::Session;
use crate::ssh::transport::{AuthConfig, Endpoint, Transport};
use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_sessions: usize,
    pub max_sessions_per_host: usize,
    pub session_timeout: Duration,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
    pub connect_timeout: Duration,
    pub keepalive_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: session_constants::MAX_SESSIONS,
            max_sessions_per_host: session_constants::MAX_SESSIONS_PER_HOST,
            session_timeout: Duration::from_secs(session_constants::SESSION_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(session_constants::IDLE_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(session_constants::CLEANUP_INTERVAL_SECS),
            connect_timeout: Duration::from_secs(crate::constants::network::CONNECT_TIMEOUT_SECS),
            keepalive_interval_secs: crate::constants::network::KEEPALIVE_INTERVAL_SECS,
        }
    }
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    config: RegistryConfig,
    logger: Logger,
    reaper_stop: Mutex<Option<mpsc::Sender<()>>>,
    reaper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, logger: Logger) -> Arc<Self> {
        let registry = Arc::new(Self {
            sessions: DashMap::new(),
            config,
            logger: logger.child("registry"),
            reaper_stop: Mutex::new(None),
            reaper_handle: Mutex::new(None),
        });
        registry.clone().start_reaper();
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Open a transport and register a new session, enforcing quotas and
    /// alias uniqueness. An unhealthy session holding the requested alias is
    /// torn down and replaced silently.
    pub async fn create_session(
        self: &Arc<Self>,
        endpoint: Endpoint,
        auth: AuthConfig,
        alias: Option<String>,
    ) -> Result<Arc<Session>, ToolError> {
        if self.live_count() >= self.config.max_sessions {
            return Err(ToolError::quota(format!(
                "Maximum sessions limit reached: {}",
                self.config.max_sessions
            )));
        }
        if self.live_count_for_host(&endpoint.host) >= self.config.max_sessions_per_host {
            return Err(ToolError::quota(format!(
                "Maximum sessions per host limit reached: {} for host {}",
                self.config.max_sessions_per_host, endpoint.host
            )));
        }

        let alias = match alias.filter(|a| !a.trim().is_empty()) {
            Some(alias) => {
                let alias = alias.trim().to_string();
                self.resolve_alias_conflict(&alias).await?;
                alias
            }
            None => self.generate_alias(),
        };

        let connect_timeout = self.config.connect_timeout;
        let keepalive = self.config.keepalive_interval_secs;
        let endpoint_clone = endpoint.clone();
        let auth_clone = auth.clone();
        let (transport, sftp) = tokio::task::spawn_blocking(move || {
            let transport =
                Transport::connect(endpoint_clone, &auth_clone, connect_timeout, keepalive)?;
            let sftp = transport.open_sftp()?;
            Ok::<_, ToolError>((transport, sftp))
        })
        .await
        .map_err(|_| ToolError::internal("SSH connect task failed"))??;

        let id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            alias.clone(),
            endpoint.clone(),
            auth,
            Arc::new(transport),
            sftp,
            self.config.session_timeout,
            self.logger.child("session"),
        ));
        self.sessions.insert(id.clone(), session.clone());

        self.logger.info(
            "created session",
            Some(&serde_json::json!({
                "session_id": id,
                "alias": alias,
                "host": endpoint.host,
                "port": endpoint.port,
                "username": endpoint.username,
            })),
        );

        Ok(session)
    }

    /// A live session already holds the alias: probe it with a throwaway
    /// channel. Healthy wins; a broken one is reaped so the alias can be
    /// reused. The probe runs outside any registry lock.
    async fn resolve_alias_conflict(self: &Arc<Self>, alias: &str) -> Result<(), ToolError> {
        let Some(existing) = self.find_by_alias(alias) else {
            return Ok(());
        };

        let transport = existing.transport().clone();
        let healthy = tokio::task::spawn_blocking(move || transport.health_check())
            .await
            .unwrap_or(false);

        if healthy {
            return Err(ToolError::alias_in_use(alias));
        }

        self.logger.warn(
            "replacing unhealthy session holding alias",
            Some(&serde_json::json!({"alias": alias, "session_id": existing.id})),
        );
        self.remove_session(&existing.id).await.ok();
        Ok(())
    }

    /// Smallest unused `s<i>` up to the cap, then a random hex fallback.
    fn generate_alias(&self) -> String {
        for i in 1..=session_constants::MAX_GENERATED_ALIAS {
            let candidate = format!("s{}", i);
            if self.find_by_alias(&candidate).is_none() {
                return candidate;
            }
        }
        let token: u32 = rand::thread_rng().gen();
        format!("s{:08x}", token)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|entry| entry.value().clone())?;
        if session.is_closed() {
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<Session>> {
        let session = self.find_by_alias(alias)?;
        session.touch();
        Some(session)
    }

    /// ID wins when a value could be either.
    pub fn get_by_id_or_alias(&self, key: &str) -> Result<Arc<Session>, ToolError> {
        self.get_by_id(key)
            .or_else(|| self.get_by_alias(key))
            .ok_or_else(|| ToolError::session_not_found(key))
    }

    fn find_by_alias(&self, alias: &str) -> Option<Arc<Session>> {
        self.sessions.iter().find_map(|entry| {
            let session = entry.value();
            if !session.is_closed() && session.alias == alias {
                Some(session.clone())
            } else {
                None
            }
        })
    }

    pub fn list_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .count()
    }

    pub fn live_count_for_host(&self, host: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| {
                let session = entry.value();
                !session.is_closed() && session.endpoint().host == host
            })
            .count()
    }

    /// Tear a session down leaf-first and drop it from the index. Teardown
    /// step failures are logged, never fatal.
    pub async fn remove_session(&self, id: &str) -> Result<(), ToolError> {
        let (_, session) = self
            .sessions
            .remove(id)
            .ok_or_else(|| ToolError::session_not_found(id))?;

        let logger = self.logger.clone();
        let session_id = session.id.clone();
        tokio::task::spawn_blocking(move || {
            session.close();
            logger.info(
                "removed session",
                Some(&serde_json::json!({"session_id": session_id})),
            );
        })
        .await
        .map_err(|_| ToolError::internal("Session teardown task failed"))?;
        Ok(())
    }

    fn start_reaper(self: Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        *lock(&self.reaper_stop) = Some(tx);
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.reap_expired().await,
                    _ = rx.recv() => return,
                }
            }
        });
        *lock(&self.reaper_handle) = Some(handle);
    }

    /// One reaper sweep: close sessions idle past the idle timeout or past
    /// their absolute deadline.
    pub async fn reap_expired(&self) {
        let now = Utc::now();
        let idle_cutoff = chrono::Duration::from_std(self.config.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let doomed: Vec<(String, bool, bool)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let session = entry.value();
                let idle = now - session.last_used_at() > idle_cutoff;
                let expired = now > session.expires_at;
                if idle || expired {
                    Some((session.id.clone(), idle, expired))
                } else {
                    None
                }
            })
            .collect();

        for (id, idle, expired) in doomed {
            self.logger.info(
                "reaping session",
                Some(&serde_json::json!({
                    "session_id": id,
                    "idle": idle,
                    "expired": expired,
                })),
            );
            let _ = self.remove_session(&id).await;
        }
    }

    /// Stop the reaper, then close every remaining session.
    pub async fn close(&self) {
        lock(&self.reaper_stop).take();
        let handle = lock(&self.reaper_handle).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.remove_session(&id).await;
        }
        self.logger.info("session registry closed", None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::logger::{LogLevel, Logger};

    fn test_registry(max: usize) -> Arc<SessionRegistry> {
        let config = RegistryConfig {
            max_sessions: max,
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        SessionRegistry::new(config, Logger::with_level("test", LogLevel::Error))
    }

    #[tokio::test]
    async fn generated_aliases_start_at_s1() {
        let registry = test_registry(10);
        assert_eq!(registry.generate_alias(), "s1");
        registry.close().await;
    }

    #[tokio::test]
    async fn unknown_lookup_is_session_not_found() {
        let registry = test_registry(10);
        let err = registry.get_by_id_or_alias("missing").unwrap_err();
        assert_eq!(err.code, "SESSION_NOT_FOUND");
        registry.close().await;
    }

    #[tokio::test]
    async fn create_against_unreachable_host_surfaces_transport_error() {
        let registry = test_registry(10);
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "nobody".to_string(),
        };
        let auth = AuthConfig {
            method: crate::ssh::transport::AuthMethod::Password("pw".to_string()),
            sudo_password: None,
        };
        let config = RegistryConfig {
            connect_timeout: Duration::from_millis(200),
            cleanup_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let registry2 = SessionRegistry::new(config, Logger::with_level("test", LogLevel::Error));
        let err = registry2
            .create_session(endpoint, auth, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "TRANSPORT");
        assert_eq!(registry2.live_count(), 0);
        registry.close().await;
        registry2.close().await;
    }

    #[tokio::test]
    async fn quota_zero_rejects_immediately() {
        let registry = test_registry(0);
        let endpoint = Endpoint {
            host: "example.invalid".to_string(),
            port: 22,
            username: "u".to_string(),
        };
        let auth = AuthConfig {
            method: crate::ssh::transport::AuthMethod::Password("pw".to_string()),
            sudo_password: None,
        };
        let err = registry
            .create_session(endpoint, auth, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "QUOTA_EXCEEDED");
        registry.close().await;
    }
}
