use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    acquisition::{
        AcquisitionError, AcquisitionLoop, AcquisitionSettings, RunReport,
        error::{already_running, not_found, provider_failure, shutting_down, validation_error},
    },
    provider::{AddressProviderFactory, ProviderCredentials, ProviderErrorKind},
    session::{RunControl, SessionId, SessionStatus, SessionStore, SessionUpdate},
};

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session_id: SessionId,
    pub credentials: ProviderCredentials,
}

/// Session lifecycle entry points shared by every transport.
pub struct AcquisitionService {
    engine: AcquisitionLoop,
    store: Arc<dyn SessionStore>,
    providers: Arc<dyn AddressProviderFactory>,
    active: Mutex<HashMap<SessionId, CancellationToken>>,
    shutdown: CancellationToken,
    idle: Notify,
}

impl AcquisitionService {
    pub fn new(
        settings: AcquisitionSettings,
        store: Arc<dyn SessionStore>,
        providers: Arc<dyn AddressProviderFactory>,
    ) -> Self {
        Self {
            engine: AcquisitionLoop::new(settings, Arc::clone(&store)),
            store,
            providers,
            active: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            idle: Notify::new(),
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        self.engine.settings()
    }

    /// Creates the session on first use and drives it until it completes,
    /// stops or fails. A stopped session returns immediately without any
    /// provider call.
    #[tracing::instrument(
        name = "start_or_resume",
        target = "service",
        skip(self, request),
        fields(session_id = %request.session_id)
    )]
    pub async fn start_or_resume(&self, request: StartRequest) -> Result<RunReport, AcquisitionError> {
        let session_id = request.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(validation_error("session id cannot be empty"));
        }
        request
            .credentials
            .validate()
            .map_err(|err| validation_error(format!("invalid credentials: {err}")))?;

        let provider = self
            .providers
            .connect(&request.credentials)
            .map_err(|err| match err.kind {
                ProviderErrorKind::InvalidRequest | ProviderErrorKind::Authentication => {
                    validation_error(format!("invalid provider settings: {err}"))
                }
                _ => provider_failure("connect", err),
            })?;

        let registration = self.register(&session_id)?;
        let (session, created) = self
            .store
            .get_or_create(&session_id, self.settings().quota)
            .await?;
        tracing::info!(
            target: "service",
            session_id = %session_id,
            created = created,
            region = %request.credentials.region,
            allocated = session.allocated_ips.len(),
            run_control = ?session.run_control,
            "run_started"
        );

        let report = self
            .engine
            .run(session, provider.as_ref(), registration.token())
            .await?;
        tracing::info!(
            target: "service",
            session_id = %session_id,
            outcome = ?report.outcome,
            batches = report.batches,
            acquisitions = report.acquisitions,
            "run_finished"
        );
        Ok(report)
    }

    /// Persists the stop and wakes the in-process run, if any. The run
    /// finishes at its next checkpoint.
    pub async fn request_stop(&self, session_id: &str) -> Result<SessionStatus, AcquisitionError> {
        let record = self
            .store
            .apply(session_id, SessionUpdate::SetRunControl(RunControl::Stopped))
            .await?;

        let woke_run = match self.lock_active().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        tracing::info!(
            target: "service",
            session_id = %session_id,
            woke_run = woke_run,
            "stop_requested"
        );
        Ok(record.status())
    }

    pub async fn read_status(&self, session_id: &str) -> Result<SessionStatus, AcquisitionError> {
        self.store
            .get(session_id)
            .await?
            .map(|record| record.status())
            .ok_or_else(|| not_found(session_id))
    }

    pub fn active_runs(&self) -> usize {
        self.lock_active().len()
    }

    /// Interrupts every active run without touching persisted run control,
    /// so each of them resumes on the next start. Later starts are refused.
    pub fn shutdown(&self) {
        let active = self.lock_active();
        for session_id in active.keys() {
            tracing::info!(target: "service", session_id = %session_id, "run_interrupted");
        }
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once no run is registered.
    pub async fn wait_idle(&self) {
        loop {
            let released = self.idle.notified();
            if self.active_runs() == 0 {
                return;
            }
            released.await;
        }
    }

    fn register(&self, session_id: &str) -> Result<ActiveRun<'_>, AcquisitionError> {
        let mut active = self.lock_active();
        if self.shutdown.is_cancelled() {
            return Err(shutting_down(session_id));
        }
        if active.contains_key(session_id) {
            return Err(already_running(session_id));
        }
        let token = self.shutdown.child_token();
        active.insert(session_id.to_string(), token.clone());
        Ok(ActiveRun {
            service: self,
            session_id: session_id.to_string(),
            token,
        })
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry slot for one in-flight run; released on every exit path.
struct ActiveRun<'a> {
    service: &'a AcquisitionService,
    session_id: SessionId,
    token: CancellationToken,
}

impl ActiveRun<'_> {
    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.service.lock_active().remove(&self.session_id);
        self.service.idle.notify_waiters();
    }
}
