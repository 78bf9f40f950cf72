use std::{
    collections::HashMap,
    fs,
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::session::{
    error::SessionStoreError,
    types::{SessionId, SessionRecord, SessionUpdate},
};

const PERSISTENCE_VERSION: u64 = 1;

/// Durable home of session records.
///
/// Every mutation is a read-modify-write of one whole record, serialized per
/// session id, and is durable before the call returns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// Fetches the record or creates it with defaults as one step. The flag
    /// reports whether this call created it.
    async fn get_or_create(
        &self,
        session_id: &str,
        quota: usize,
    ) -> Result<(SessionRecord, bool), SessionStoreError>;

    async fn apply(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionRecord, SessionStoreError>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    records: Mutex<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: SessionRecord) {
        self.records
            .lock()
            .await
            .insert(record.session_id.clone(), record);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        Ok(self.records.lock().await.get(session_id).cloned())
    }

    async fn get_or_create(
        &self,
        session_id: &str,
        quota: usize,
    ) -> Result<(SessionRecord, bool), SessionStoreError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(session_id) {
            return Ok((record.clone(), false));
        }
        let record = SessionRecord::new(session_id, quota);
        records.insert(session_id.to_string(), record.clone());
        Ok((record, true))
    }

    async fn apply(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionRecord, SessionStoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| SessionStoreError::NotFound(session_id.to_string()))?;
        record.apply(&update);
        Ok(record.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    version: u64,
    session: SessionRecord,
}

/// One JSON document per session under `dir`, replaced atomically on save.
pub struct FileSessionStore {
    dir: PathBuf,
    locks: StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|err| SessionStoreError::io("create session directory", &dir, err))?;
        Ok(Self {
            dir,
            locks: StdMutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session ids are caller-chosen, so file names are derived from a digest
    /// rather than the raw id.
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(Sha256::digest(session_id.as_bytes()))))
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Runs `op` under the session's lock, then forgets the lock once no
    /// other caller holds or waits on it.
    async fn with_session_lock<T>(
        &self,
        session_id: &str,
        op: impl FnOnce() -> Result<T, SessionStoreError>,
    ) -> Result<T, SessionStoreError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            op()
        };

        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(lock);
        if locks
            .get(session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(session_id);
        }
        result
    }

    fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let path = self.path_for(session_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SessionStoreError::io("read session state", &path, err)),
        };

        let parsed: PersistedSession = serde_json::from_str(&content)
            .map_err(|source| SessionStoreError::Decode {
                path: path.clone(),
                source,
            })?;
        if parsed.version != PERSISTENCE_VERSION {
            return Err(SessionStoreError::UnsupportedVersion {
                version: parsed.version,
                path,
            });
        }
        if parsed.session.session_id != session_id {
            return Err(SessionStoreError::IdentityMismatch {
                path,
                expected: session_id.to_string(),
                found: parsed.session.session_id,
            });
        }

        Ok(Some(parsed.session))
    }

    fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let path = self.path_for(&record.session_id);
        let persisted = PersistedSession {
            version: PERSISTENCE_VERSION,
            session: record.clone(),
        };

        let tmp_path = path.with_extension("json.tmp");
        let file = fs::File::create(&tmp_path)
            .map_err(|err| SessionStoreError::io("create session temp file", &tmp_path, err))?;
        {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &persisted).map_err(|source| {
                SessionStoreError::Encode {
                    path: tmp_path.clone(),
                    source,
                }
            })?;
            writer
                .write_all(b"\n")
                .and_then(|()| writer.flush())
                .map_err(|err| SessionStoreError::io("write session temp file", &tmp_path, err))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|err| SessionStoreError::io("sync session temp file", &tmp_path, err))?;
        }

        fs::rename(&tmp_path, &path)
            .map_err(|err| SessionStoreError::io("replace session state", &path, err))?;

        if let Ok(dir) = fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        tracing::debug!(
            target: "session_store",
            session_id = %record.session_id,
            created = record.created_ips.len(),
            allocated = record.allocated_ips.len(),
            released = record.released_ips.len(),
            run_control = ?record.run_control,
            "session_saved"
        );
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        self.load(session_id)
    }

    async fn get_or_create(
        &self,
        session_id: &str,
        quota: usize,
    ) -> Result<(SessionRecord, bool), SessionStoreError> {
        self.with_session_lock(session_id, || {
            if let Some(record) = self.load(session_id)? {
                return Ok((record, false));
            }
            let record = SessionRecord::new(session_id, quota);
            self.save(&record)?;
            Ok((record, true))
        })
        .await
    }

    async fn apply(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<SessionRecord, SessionStoreError> {
        self.with_session_lock(session_id, || {
            let mut record = self
                .load(session_id)?
                .ok_or_else(|| SessionStoreError::NotFound(session_id.to_string()))?;
            record.apply(&update);
            self.save(&record)?;
            Ok(record)
        })
        .await
    }
}
