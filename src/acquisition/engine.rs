use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    acquisition::{
        classifier::PrefixClassifier,
        error::{
            AcquisitionError, AcquisitionErrorKind, attempt_budget_exhausted, not_found,
            provider_failure,
        },
        retry::ReleaseRetrier,
        types::{AcquisitionSettings, LoopState, RunOutcome, RunReport},
    },
    logging::STRANDED_TARGET,
    provider::{AcquiredAddress, AddressProvider},
    session::{AllocatedAddress, SessionRecord, SessionStore, SessionUpdate},
};

#[derive(Debug, Default, Clone, Copy)]
struct RunCounters {
    batches: u32,
    acquisitions: u64,
}

/// Drives one session towards its quota of qualifying addresses.
///
/// Each batch issues up to `quota - kept` acquisitions, keeps qualifying
/// addresses and releases the rest, then checkpoints the whole session. The
/// loop waits `batch_delay` between batches and stops at any checkpoint once
/// the cancellation token fires or the stored run control reads `stopped`.
pub struct AcquisitionLoop {
    settings: AcquisitionSettings,
    classifier: PrefixClassifier,
    retrier: ReleaseRetrier,
    store: Arc<dyn SessionStore>,
}

impl AcquisitionLoop {
    pub fn new(settings: AcquisitionSettings, store: Arc<dyn SessionStore>) -> Self {
        let classifier = PrefixClassifier::new(&settings.allowed_prefixes);
        let retrier = ReleaseRetrier::new(settings.release_retry_limit, settings.release_retry_delay);
        Self {
            settings,
            classifier,
            retrier,
            store,
        }
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    #[tracing::instrument(
        name = "acquisition_run",
        target = "acquisition",
        skip(self, session, provider, cancel),
        fields(session_id = %session.session_id)
    )]
    pub async fn run(
        &self,
        session: SessionRecord,
        provider: &dyn AddressProvider,
        cancel: &CancellationToken,
    ) -> Result<RunReport, AcquisitionError> {
        let mut session = session;
        let mut counters = RunCounters::default();

        loop {
            match self.next_state(&session, cancel) {
                LoopState::Complete => {
                    return self.finish(session, RunOutcome::Complete, counters).await;
                }
                LoopState::Stopped => {
                    return self.finish(session, RunOutcome::Stopped, counters).await;
                }
                _ => {}
            }

            counters.batches += 1;
            self.log_transition(&session, LoopState::Running, counters);
            if let Err(err) = self
                .run_batch(&mut session, provider, cancel, &mut counters)
                .await
            {
                if err.kind == AcquisitionErrorKind::AttemptBudgetExhausted {
                    self.checkpoint(&mut session).await?;
                }
                return Err(self.fail(&session, err, counters));
            }
            self.checkpoint(&mut session).await?;
            tracing::info!(
                target: "acquisition",
                session_id = %session.session_id,
                batch = counters.batches,
                allocated = session.allocated_ips.len(),
                released = session.released_ips.len(),
                next_batch_size = session.batch_size,
                "batch_checkpointed"
            );

            if self.next_state(&session, cancel) != LoopState::Running {
                continue;
            }

            self.log_transition(&session, LoopState::WaitingBetweenBatches, counters);
            self.pause(self.settings.batch_delay, cancel).await;
            let stored = self
                .store
                .get(&session.session_id)
                .await?
                .ok_or_else(|| not_found(&session.session_id))?;
            session.run_control = stored.run_control;
        }
    }

    fn next_state(&self, session: &SessionRecord, cancel: &CancellationToken) -> LoopState {
        if session.allocated_ips.len() >= self.settings.quota {
            LoopState::Complete
        } else if !session.is_running() || cancel.is_cancelled() {
            LoopState::Stopped
        } else {
            LoopState::Running
        }
    }

    /// One batch. On error the in-memory work is discarded by the caller;
    /// the store keeps the previous checkpoint.
    async fn run_batch(
        &self,
        session: &mut SessionRecord,
        provider: &dyn AddressProvider,
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<(), AcquisitionError> {
        session.batch_size = session.remaining(self.settings.quota);

        for _ in 0..session.batch_size {
            if cancel.is_cancelled() {
                tracing::info!(
                    target: "acquisition",
                    session_id = %session.session_id,
                    "batch_interrupted"
                );
                return Ok(());
            }
            if counters.acquisitions >= self.settings.max_acquisitions_per_run {
                return Err(attempt_budget_exhausted(
                    &session.session_id,
                    self.settings.max_acquisitions_per_run,
                ));
            }

            counters.acquisitions += 1;
            let acquired = provider
                .acquire()
                .await
                .map_err(|err| provider_failure("acquire", err))?;
            self.classify_unit(session, provider, cancel, acquired)
                .await?;

            if session.allocated_ips.len() >= self.settings.quota {
                break;
            }
        }

        Ok(())
    }

    async fn classify_unit(
        &self,
        session: &mut SessionRecord,
        provider: &dyn AddressProvider,
        cancel: &CancellationToken,
        acquired: AcquiredAddress,
    ) -> Result<(), AcquisitionError> {
        let AcquiredAddress {
            public_ip,
            allocation_id,
        } = acquired;

        if session.has_seen(&public_ip) {
            tracing::debug!(
                target: "acquisition",
                session_id = %session.session_id,
                ip = %public_ip,
                "duplicate_address_skipped"
            );
            return Ok(());
        }
        session.created_ips.push(public_ip.clone());

        if self.classifier.qualifies(&public_ip) {
            tracing::info!(
                target: "acquisition",
                session_id = %session.session_id,
                ip = %public_ip,
                allocation_id = %allocation_id,
                "address_kept"
            );
            session.allocated_ips.push(AllocatedAddress {
                ip: public_ip,
                allocation_id,
            });
            return Ok(());
        }

        match self.retrier.release(provider, &allocation_id).await {
            Ok(attempts) => {
                tracing::info!(
                    target: "acquisition",
                    session_id = %session.session_id,
                    ip = %public_ip,
                    attempts = attempts,
                    "address_released"
                );
                session.released_ips.push(public_ip);
                self.pause(self.settings.unit_delay, cancel).await;
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    target: STRANDED_TARGET,
                    session_id = %session.session_id,
                    ip = %public_ip,
                    allocation_id = %allocation_id,
                    "address_stranded"
                );
                Err(AcquisitionError {
                    message: format!("{} (address {public_ip} is still allocated)", err.message),
                    ..err
                })
            }
        }
    }

    /// Recomputes the batch size and persists progress. The stored record
    /// wins for run control so a concurrent stop is observed here.
    async fn checkpoint(&self, session: &mut SessionRecord) -> Result<(), AcquisitionError> {
        session.batch_size = session.remaining(self.settings.quota);
        let stored = self
            .store
            .apply(
                &session.session_id,
                SessionUpdate::Progress(session.progress()),
            )
            .await?;
        *session = stored;
        Ok(())
    }

    async fn finish(
        &self,
        mut session: SessionRecord,
        outcome: RunOutcome,
        counters: RunCounters,
    ) -> Result<RunReport, AcquisitionError> {
        self.checkpoint(&mut session).await?;
        let state = match outcome {
            RunOutcome::Complete => LoopState::Complete,
            RunOutcome::Stopped => LoopState::Stopped,
        };
        self.log_transition(&session, state, counters);

        Ok(RunReport {
            outcome,
            batches: counters.batches,
            acquisitions: counters.acquisitions,
            status: session.status(),
        })
    }

    /// Fatal errors leave the store at the last completed checkpoint.
    fn fail(
        &self,
        session: &SessionRecord,
        err: AcquisitionError,
        counters: RunCounters,
    ) -> AcquisitionError {
        self.log_transition(session, LoopState::Failed, counters);
        tracing::error!(
            target: "acquisition",
            session_id = %session.session_id,
            kind = ?err.kind,
            error = %err,
            "run_failed"
        );
        err
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = sleep(duration) => {}
            _ = cancel.cancelled() => {}
        }
    }

    fn log_transition(&self, session: &SessionRecord, state: LoopState, counters: RunCounters) {
        tracing::debug!(
            target: "acquisition",
            session_id = %session.session_id,
            state = ?state,
            batch = counters.batches,
            acquisitions = counters.acquisitions,
            allocated = session.allocated_ips.len(),
            "loop_state"
        );
    }
}
