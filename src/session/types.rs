use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunControl {
    Running,
    Stopped,
}

/// A kept address together with the handle that releases it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedAddress {
    pub ip: String,
    pub allocation_id: String,
}

/// Durable progress of one acquisition run.
///
/// All lists are append-only. `created_ips` holds every address the provider
/// ever returned for this session and is the dedup set; the other lists are
/// subsequences of it in classification order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    #[serde(default)]
    pub created_ips: Vec<String>,
    #[serde(default)]
    pub allocated_ips: Vec<AllocatedAddress>,
    #[serde(default)]
    pub released_ips: Vec<String>,
    pub batch_size: usize,
    pub run_control: RunControl,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<SessionId>, quota: usize) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            session_id: session_id.into(),
            created_ips: Vec::new(),
            allocated_ips: Vec::new(),
            released_ips: Vec::new(),
            batch_size: quota,
            run_control: RunControl::Running,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_control == RunControl::Running
    }

    pub fn has_seen(&self, ip: &str) -> bool {
        self.created_ips.iter().any(|seen| seen == ip)
    }

    pub fn remaining(&self, quota: usize) -> usize {
        quota.saturating_sub(self.allocated_ips.len())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            created_ips: self.created_ips.clone(),
            allocated_ips: self.allocated_ips.clone(),
            released_ips: self.released_ips.clone(),
            run_control: self.run_control,
        }
    }

    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            created_ips: self.created_ips.clone(),
            allocated_ips: self.allocated_ips.clone(),
            released_ips: self.released_ips.clone(),
            batch_size: self.batch_size,
        }
    }

    /// Appends every entry of `progress` not already recorded, preserving
    /// order. Applying the same progress twice leaves the lists unchanged.
    pub fn merge_progress(&mut self, progress: &SessionProgress) {
        for ip in &progress.created_ips {
            if !self.has_seen(ip) {
                self.created_ips.push(ip.clone());
            }
        }
        merge_addresses(&mut self.allocated_ips, &progress.allocated_ips);
        for ip in &progress.released_ips {
            if !self.released_ips.contains(ip) {
                self.released_ips.push(ip.clone());
            }
        }
        self.batch_size = progress.batch_size;
    }

    pub fn apply(&mut self, update: &SessionUpdate) {
        match update {
            SessionUpdate::Progress(progress) => self.merge_progress(progress),
            SessionUpdate::SetRunControl(run_control) => self.run_control = *run_control,
        }
        self.updated_at = OffsetDateTime::now_utc();
    }
}

fn merge_addresses(target: &mut Vec<AllocatedAddress>, incoming: &[AllocatedAddress]) {
    for address in incoming {
        if !target
            .iter()
            .any(|existing| existing.allocation_id == address.allocation_id)
        {
            target.push(address.clone());
        }
    }
}

/// The loop-owned part of a session, written at every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionProgress {
    pub created_ips: Vec<String>,
    pub allocated_ips: Vec<AllocatedAddress>,
    pub released_ips: Vec<String>,
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Progress(SessionProgress),
    SetRunControl(RunControl),
}

/// Read-only view handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub created_ips: Vec<String>,
    pub allocated_ips: Vec<AllocatedAddress>,
    pub released_ips: Vec<String>,
    pub run_control: RunControl,
}
