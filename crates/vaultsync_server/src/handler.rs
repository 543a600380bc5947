//! Request handlers for the vault operations.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::lifecycle::{RequestState, RequestTrace};
use crate::message::{
    BackupPayload, CreateBackupRequest, DeleteResult, RecordView, Request, Response,
    StoreRecordRequest, StoredRecord, SweepReport,
};
use crate::stats::{ServiceStats, StatsSnapshot};
use crate::vault::{BackupInfo, BackupVault};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use vaultsync_core::{
    Cipher, CoreError, EncryptionKey, ExportFormat, Exporter, Payload, RecordDraft, RecordId,
    RecordKind, RecordStore, SearchPage, SearchQuery,
};
use vaultsync_sync::{Reconciler, SyncRequest, SyncResponse};

/// Shared state for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    store: Arc<dyn RecordStore>,
    cipher: Arc<dyn Cipher>,
    key: Arc<EncryptionKey>,
    exporter: Exporter,
    reconciler: Reconciler,
    vault: BackupVault,
    stats: ServiceStats,
}

impl HandlerContext {
    /// Creates a context over `store`, sealing payloads with `key`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the configured backup directory cannot be
    /// opened.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
        cipher: Arc<dyn Cipher>,
        key: EncryptionKey,
    ) -> ServerResult<Self> {
        let key = Arc::new(key);
        let vault = match &config.backup_dir {
            Some(dir) => BackupVault::open(dir)?,
            None => BackupVault::in_memory(),
        };
        let reconciler =
            Reconciler::new(config.conflict_policy).with_max_batch(config.max_sync_batch);
        Ok(Self {
            exporter: Exporter::new(Arc::clone(&cipher), Arc::clone(&key)),
            config,
            store,
            cipher,
            key,
            reconciler,
            vault,
            stats: ServiceStats::new(),
        })
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The backup vault.
    pub fn vault(&self) -> &BackupVault {
        &self.vault
    }

    /// Request statistics.
    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    /// The backup exporter.
    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }
}

/// A validated store request.
#[derive(Debug)]
struct StoreCommand {
    kind: RecordKind,
    id: Option<RecordId>,
    session_id: Option<String>,
    ttl: Option<Duration>,
    fields: Map<String, Value>,
}

impl StoreCommand {
    fn validate(kind: RecordKind, request: StoreRecordRequest) -> ServerResult<Self> {
        if request.fields.is_empty() {
            return Err(ServerError::invalid("fields must not be empty"));
        }
        let id = request.id.map(RecordId::parse).transpose()?;
        let session_id = request.session_id.map(|s| s.trim().to_owned());
        match &session_id {
            Some(s) if s.is_empty() => {
                return Err(ServerError::invalid("sessionId must not be blank"));
            }
            None if kind == RecordKind::Session => {
                return Err(ServerError::invalid("sessions require a sessionId"));
            }
            _ => {}
        }
        let ttl = match request.ttl_seconds {
            Some(0) => return Err(ServerError::invalid("ttlSeconds must be positive")),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };
        Ok(Self {
            kind,
            id,
            session_id,
            ttl,
            fields: request.fields,
        })
    }
}

/// A request that passed validation.
#[derive(Debug)]
enum Command {
    Store(StoreCommand),
    Get { id: RecordId, decrypt: bool },
    Delete(RecordId),
    Search(SearchQuery),
    Sync(SyncRequest),
    CreateBackup(CreateBackupRequest),
    GetBackup(String),
    Stats,
    Sweep,
}

fn member_query(mut query: SearchQuery) -> ServerResult<SearchQuery> {
    query.validate()?;
    query.kind.get_or_insert(RecordKind::Member);
    Ok(query)
}

fn validate_backup(request: &CreateBackupRequest) -> ServerResult<()> {
    if request
        .session_id
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        return Err(ServerError::invalid("sessionId must not be blank"));
    }
    Ok(())
}

impl Command {
    fn validate(request: Request, context: &HandlerContext) -> ServerResult<Self> {
        Ok(match request {
            Request::StoreMember(r) => Self::Store(StoreCommand::validate(RecordKind::Member, r)?),
            Request::StoreSession(r) => {
                Self::Store(StoreCommand::validate(RecordKind::Session, r)?)
            }
            Request::GetRecord(r) => Self::Get {
                id: RecordId::parse(r.id)?,
                decrypt: r.decrypt,
            },
            Request::DeleteRecord(r) => Self::Delete(RecordId::parse(r.id)?),
            Request::SearchMembers(query) => Self::Search(member_query(query)?),
            Request::SyncData(sync) => {
                context.reconciler.validate(&sync)?;
                Self::Sync(sync)
            }
            Request::CreateBackup(r) => {
                validate_backup(&r)?;
                Self::CreateBackup(r)
            }
            Request::GetBackup(r) => {
                if r.backup_id.trim().is_empty() {
                    return Err(ServerError::invalid("backupId must not be empty"));
                }
                Self::GetBackup(r.backup_id)
            }
            Request::Stats => Self::Stats,
            Request::Sweep => Self::Sweep,
        })
    }
}

/// Handler for vault requests.
///
/// Every operation validates its input completely before it reads or
/// writes the store.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles one request, turning failures into error responses.
    pub fn handle(&self, request: Request) -> Response {
        let op = request.op_name();
        let mut trace = RequestTrace::received(op);

        let result = Command::validate(request, &self.context).and_then(|command| {
            trace.advance(RequestState::Validated);
            self.execute(command)
        });

        let response = match result {
            Ok(response) => {
                trace.advance(RequestState::Processed);
                response
            }
            Err(e) => {
                trace.advance(RequestState::Failed);
                log_failure(op, &e);
                Response::error(&e)
            }
        };
        trace.advance(RequestState::Responded);
        self.context
            .stats
            .record(trace.elapsed(), !response.is_error());
        response
    }

    fn execute(&self, command: Command) -> ServerResult<Response> {
        Ok(match command {
            Command::Store(c) => Response::Stored(self.store_record(c)?),
            Command::Get { id, decrypt } => Response::Record(self.fetch(&id, decrypt)?),
            Command::Delete(id) => Response::Deleted(self.remove(id)?),
            Command::Search(query) => Response::SearchResults(self.context.store.search(&query)?),
            Command::Sync(sync) => Response::SyncResult(
                self.context
                    .reconciler
                    .reconcile(self.context.store.as_ref(), sync)?,
            ),
            Command::CreateBackup(r) => Response::BackupCreated(self.backup(r)?),
            Command::GetBackup(id) => Response::Backup(self.get_backup(&id)?),
            Command::Stats => Response::Stats(self.stats()),
            Command::Sweep => Response::Swept(self.sweep()?),
        })
    }

    /// Encrypts and stores a member profile.
    pub fn store_member(&self, request: StoreRecordRequest) -> ServerResult<StoredRecord> {
        self.store_record(StoreCommand::validate(RecordKind::Member, request)?)
    }

    /// Encrypts and stores a scraping session record.
    pub fn store_session(&self, request: StoreRecordRequest) -> ServerResult<StoredRecord> {
        self.store_record(StoreCommand::validate(RecordKind::Session, request)?)
    }

    /// Fetches a record, optionally decrypting its fields.
    pub fn get_record(&self, id: &str, decrypt: bool) -> ServerResult<RecordView> {
        self.fetch(&RecordId::parse(id)?, decrypt)
    }

    /// Deletes a record.
    pub fn delete_record(&self, id: &str) -> ServerResult<DeleteResult> {
        self.remove(RecordId::parse(id)?)
    }

    /// Searches member records.
    pub fn search_members(&self, query: SearchQuery) -> ServerResult<SearchPage> {
        Ok(self.context.store.search(&member_query(query)?)?)
    }

    /// Reconciles a device's changes.
    pub fn sync_data(&self, request: SyncRequest) -> ServerResult<SyncResponse> {
        Ok(self
            .context
            .reconciler
            .reconcile(self.context.store.as_ref(), request)?)
    }

    /// Exports a backup and stores it in the vault.
    pub fn create_backup(
        &self,
        session_id: Option<String>,
        format: ExportFormat,
    ) -> ServerResult<BackupInfo> {
        let request = CreateBackupRequest { session_id, format };
        validate_backup(&request)?;
        self.backup(request)
    }

    /// Fetches a stored backup.
    pub fn get_backup(&self, backup_id: &str) -> ServerResult<BackupPayload> {
        let stored = self
            .context
            .vault
            .get(backup_id)?
            .ok_or_else(|| ServerError::BackupNotFound(backup_id.to_owned()))?;
        Ok(BackupPayload {
            info: stored.info,
            data: stored.data,
        })
    }

    /// Current statistics. Reads counters only.
    pub fn stats(&self) -> StatsSnapshot {
        let store = &self.context.store;
        let stats = &self.context.stats;
        StatsSnapshot {
            total_records: store.live_count(),
            total_sessions: store.session_count(),
            storage_used: store.storage_used(),
            avg_response_time: stats.avg_response_time_ms(),
            uptime: stats.uptime().as_secs(),
            requests: stats.requests(),
            failures: stats.failures(),
            backups: self.context.vault.len(),
        }
    }

    /// Removes expired records and prunes the change log.
    pub fn sweep(&self) -> ServerResult<SweepReport> {
        let removed = self.context.store.sweep_expired()?;
        let pruned = self.context.store.prune_changes()?;
        Ok(SweepReport { removed, pruned })
    }

    fn store_record(&self, command: StoreCommand) -> ServerResult<StoredRecord> {
        let context = &self.context;
        let plaintext = serde_json::to_vec(&command.fields)
            .map_err(|e| ServerError::Internal(format!("encoding fields: {e}")))?;
        let ciphertext = context.cipher.encrypt(&plaintext, &context.key)?;

        let mut payload = Payload::new(ciphertext);
        for name in &context.config.store.indexed_fields {
            if let Some(value) = command.fields.get(name).and_then(index_value) {
                payload = payload.with_field(name.clone(), value);
            }
        }

        let mut draft = RecordDraft::new(command.kind, payload);
        draft.id = command.id;
        draft.session_id = command.session_id;
        draft.expires_at = command
            .ttl
            .map(|ttl| context.store.now().saturating_add(ttl));

        let record = context.store.put(draft)?;
        Ok(StoredRecord {
            id: record.id,
            version: record.version,
            expires_at: record.expires_at,
        })
    }

    fn fetch(&self, id: &RecordId, decrypt: bool) -> ServerResult<RecordView> {
        let record = self.context.store.get(id)?;
        let fields = if decrypt {
            let plain = self
                .context
                .cipher
                .decrypt(&record.payload.ciphertext, &self.context.key)?;
            Some(
                serde_json::from_slice(&plain)
                    .map_err(|e| CoreError::format(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(RecordView { record, fields })
    }

    fn remove(&self, id: RecordId) -> ServerResult<DeleteResult> {
        let deleted = self.context.store.delete(&id)?;
        Ok(DeleteResult { id, deleted })
    }

    fn backup(&self, request: CreateBackupRequest) -> ServerResult<BackupInfo> {
        let export = self.context.exporter.export(
            self.context.store.as_ref(),
            request.session_id.as_deref(),
            request.format,
        )?;
        self.context.vault.insert(export, request.session_id)
    }
}

/// Cleartext form of an indexed field; nested values are not indexed.
fn index_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn log_failure(op: &str, error: &ServerError) {
    if error.is_unexpected() {
        tracing::error!(op, error = %error, detail = ?error, "request failed unexpectedly");
    } else if error.is_retryable() {
        tracing::warn!(op, error = %error, "request timed out");
    } else {
        tracing::debug!(op, category = error.category(), error = %error, "request rejected");
    }
}
