mod loop_flow;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use eipkeeper::{
    acquisition::{AcquisitionLoop, AcquisitionSettings},
    provider::{AcquiredAddress, AddressProvider, ProviderError, ProviderErrorKind},
    session::{InMemorySessionStore, SessionStore},
};

pub fn allocation_id(ip: &str) -> String {
    format!("eipalloc-{}", ip.replace('.', "-"))
}

/// Hands out a fixed sequence of addresses and records every call.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<AcquiredAddress, ProviderError>>>,
    release_failures: Mutex<HashMap<String, u32>>,
    acquire_calls: AtomicU64,
    release_calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn with_addresses(ips: &[&str]) -> Self {
        let provider = Self::default();
        for ip in ips {
            provider.push_address(ip);
        }
        provider
    }

    pub fn push_address(&self, ip: &str) {
        self.script.lock().expect("lock poisoned").push_back(Ok(AcquiredAddress {
            public_ip: ip.to_string(),
            allocation_id: allocation_id(ip),
        }));
    }

    pub fn push_acquire_error(&self, err: ProviderError) {
        self.script
            .lock()
            .expect("lock poisoned")
            .push_back(Err(err));
    }

    /// The next `times` releases of `ip` fail.
    pub fn fail_release(&self, ip: &str, times: u32) {
        self.release_failures
            .lock()
            .expect("lock poisoned")
            .insert(allocation_id(ip), times);
    }

    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> Vec<String> {
        self.release_calls.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl AddressProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<AcquiredAddress, ProviderError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(ProviderError::new(
                    ProviderErrorKind::Backend,
                    "address script exhausted",
                ))
            })
    }

    async fn release(&self, allocation_id: &str) -> Result<(), ProviderError> {
        self.release_calls
            .lock()
            .expect("lock poisoned")
            .push(allocation_id.to_string());

        let mut failures = self.release_failures.lock().expect("lock poisoned");
        match failures.get_mut(allocation_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ProviderError::new(
                    ProviderErrorKind::Throttled,
                    format!("release of {allocation_id} throttled"),
                ))
            }
            _ => Ok(()),
        }
    }
}

pub fn test_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        quota: 5,
        unit_delay: Duration::from_secs(1),
        batch_delay: Duration::from_secs(60),
        release_retry_limit: 3,
        release_retry_delay: Duration::from_secs(1),
        max_acquisitions_per_run: 100,
        ..AcquisitionSettings::default()
    }
}

pub fn loop_with_store(settings: AcquisitionSettings) -> (AcquisitionLoop, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let engine = AcquisitionLoop::new(settings, Arc::clone(&store) as Arc<dyn SessionStore>);
    (engine, store)
}
