//! Integration tests for the vault service.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use vaultsync_core::{
    backup::parse_json, AesGcmCipher, ApplyOutcome, ChangeEntry, Checkpoint, CoreResult,
    EncryptionKey, ExportFormat, JournaledStore, ManualClock, Mutation, Record, RecordDraft,
    RecordId, RecordStore, SearchPage, SearchQuery, StoreConfig, SystemClock, Timestamp,
};
use vaultsync_server::{
    transport, HandlerContext, Request, RequestHandler, Response, ServerConfig, StoreRecordRequest,
    VaultServer,
};
use vaultsync_sync::{ClientChange, ConflictResolution, SyncRequest};

const START: u64 = 1_700_000_000_000;

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

fn member(name: &str, source: &str) -> StoreRecordRequest {
    StoreRecordRequest::new(fields(json!({ "name": name, "source": source })))
}

fn memory_store(clock: Arc<ManualClock>) -> Arc<dyn RecordStore> {
    Arc::new(JournaledStore::in_memory(StoreConfig::default(), clock))
}

fn handler(store: Arc<dyn RecordStore>, config: ServerConfig) -> RequestHandler {
    let context =
        HandlerContext::new(config, store, Arc::new(AesGcmCipher), EncryptionKey::generate()).unwrap();
    RequestHandler::new(Arc::new(context))
}

#[test]
fn pagination_covers_every_record_once() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let handler = handler(memory_store(Arc::clone(&clock)), ServerConfig::default());

    for i in 0..250 {
        handler
            .store_member(member(&format!("member-{i}"), "linkedin"))
            .unwrap();
        // Every fifth record shares a timestamp with the next one.
        if i % 5 != 0 {
            clock.advance(Duration::from_millis(1));
        }
    }

    let mut pages: Vec<SearchPage> = Vec::new();
    for offset in [0, 100, 200] {
        let query = SearchQuery::new().source("linkedin").page(100, offset);
        pages.push(handler.search_members(query).unwrap());
    }

    assert!(pages.iter().all(|p| p.total == 250 && p.limit == 100));
    assert_eq!(
        pages.iter().map(|p| p.results.len()).collect::<Vec<_>>(),
        [100, 100, 50]
    );

    let all: Vec<&Record> = pages.iter().flat_map(|p| p.results.iter()).collect();
    let ids: HashSet<&RecordId> = all.iter().map(|r| &r.id).collect();
    assert_eq!(ids.len(), 250);
    assert!(all.windows(2).all(|w| {
        w[0].created_at > w[1].created_at
            || (w[0].created_at == w[1].created_at && w[0].id < w[1].id)
    }));
}

#[test]
fn limit_is_capped_at_max() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let handler = handler(memory_store(clock), ServerConfig::default());
    handler.store_member(member("Ada", "github")).unwrap();

    let page = handler
        .search_members(SearchQuery::new().page(5_000, 0))
        .unwrap();
    assert_eq!(page.limit, 1000);
    assert_eq!(page.total, 1);
}

#[test]
fn json_backup_matches_search() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let handler = handler(memory_store(clock), ServerConfig::default());
    for i in 0..30 {
        let session = if i % 3 == 0 { "run-a" } else { "run-b" };
        handler
            .store_member(member(&format!("m{i}"), "xing").with_session(session))
            .unwrap();
    }

    for session in ["run-a", "run-b"] {
        let info = handler
            .create_backup(Some(session.to_owned()), ExportFormat::Json)
            .unwrap();
        let payload = handler.get_backup(&info.backup_id).unwrap();
        let document = parse_json(&payload.data).unwrap();

        let page = handler
            .search_members(SearchQuery::new().session(session).page(1000, 0))
            .unwrap();
        assert_eq!(document.records.len(), page.total);
        assert_eq!(info.record_count, page.total);
    }

    let all = handler.create_backup(None, ExportFormat::Delimited).unwrap();
    let blob = handler.get_backup(&all.backup_id).unwrap().data;
    assert_eq!(String::from_utf8(blob).unwrap().lines().count(), 31);
    assert_eq!(handler.context().vault().list().len(), 3);
}

#[test]
fn backups_are_written_to_backup_dir() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let config = ServerConfig::default().with_backup_dir(dir.path());
    let handler = handler(memory_store(clock), config);
    handler.store_member(member("Ada", "github")).unwrap();

    let info = handler.create_backup(None, ExportFormat::Encrypted).unwrap();
    let on_disk = std::fs::read(dir.path().join(format!("{}.bin", info.backup_id))).unwrap();
    assert_eq!(on_disk.len(), info.size);

    let document = handler.context().exporter().open_encrypted(&on_disk).unwrap();
    assert_eq!(document.record_count, 1);
}

#[test]
fn backups_outlive_a_restart() {
    let dir = tempdir().unwrap();
    let key_path = dir.path().join("vault.key");
    let backups = dir.path().join("backups");
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));

    let key = vaultsync_core::load_or_generate_key(&key_path).unwrap();
    let info = {
        let config = ServerConfig::default().with_backup_dir(&backups);
        let context =
            HandlerContext::new(config, memory_store(Arc::clone(&clock)), Arc::new(AesGcmCipher), key)
                .unwrap();
        let handler = RequestHandler::new(Arc::new(context));
        handler.store_member(member("Ada", "github")).unwrap();
        handler.create_backup(None, ExportFormat::Encrypted).unwrap()
    };

    let key = vaultsync_core::load_key(&key_path).unwrap();
    let config = ServerConfig::default().with_backup_dir(&backups);
    let context =
        HandlerContext::new(config, memory_store(clock), Arc::new(AesGcmCipher), key).unwrap();
    let handler = RequestHandler::new(Arc::new(context));

    assert_eq!(handler.stats().backups, 1);
    let payload = handler.get_backup(&info.backup_id).unwrap();
    assert_eq!(payload.info, info);
    let document = handler.context().exporter().open_encrypted(&payload.data).unwrap();
    assert_eq!(document.record_count, 1);
}

#[test]
fn concurrent_writers_to_one_id_are_serialized() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let store = memory_store(clock);
    let handler = Arc::new(handler(Arc::clone(&store), ServerConfig::default()));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                for i in 0..20 {
                    handler
                        .store_member(member(&format!("t{t}-{i}"), "x").with_id("shared"))
                        .unwrap();
                    handler
                        .store_member(member("own", "x").with_id(format!("own-{t}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let shared = handler.get_record("shared", false).unwrap();
    assert_eq!(shared.record.version, 160);
    let versions: Vec<u64> = store
        .changes_since(Checkpoint::ORIGIN)
        .into_iter()
        .filter(|c| c.record_id.as_str() == "shared")
        .map(|c| c.version)
        .collect();
    assert_eq!(versions, (1..=160).collect::<Vec<_>>());
    assert_eq!(handler.stats().total_records, 9);
}

#[test]
fn devices_conflict_on_the_same_record() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let handler = handler(memory_store(Arc::clone(&clock)), ServerConfig::default());
    let stored = handler.store_member(member("Ada", "github")).unwrap();

    let baseline = handler
        .sync_data(SyncRequest::new("device-a", Checkpoint::ORIGIN))
        .unwrap()
        .new_checkpoint;

    let edit = |name: &str| {
        RecordDraft::new(
            vaultsync_core::RecordKind::Member,
            vaultsync_core::Payload::new(vec![1, 2, 3]).with_field("name", name),
        )
    };

    clock.advance(Duration::from_secs(1));
    let a = handler
        .sync_data(SyncRequest::new("device-a", baseline).with_change(ClientChange::upsert(
            stored.id.clone(),
            Timestamp::from_millis(START + 500),
            edit("from A"),
        )))
        .unwrap();
    assert!(a.conflicts.is_empty());

    clock.advance(Duration::from_secs(1));
    let b = handler
        .sync_data(SyncRequest::new("device-b", baseline).with_change(ClientChange::upsert(
            stored.id.clone(),
            Timestamp::from_millis(START + 900),
            edit("from B"),
        )))
        .unwrap();
    assert_eq!(b.conflicts.len(), 1);
    assert_eq!(b.conflicts[0].resolution, ConflictResolution::ServerKept);

    let current = handler.get_record(stored.id.as_str(), false).unwrap().record;
    assert_eq!(current.version, 2);
    assert_eq!(current.payload.fields.get("name").map(String::as_str), Some("from A"));

    let idle = handler
        .sync_data(SyncRequest::new("device-b", b.new_checkpoint))
        .unwrap();
    assert!(idle.merged_changes.is_empty());
    assert_eq!(idle.new_checkpoint, b.new_checkpoint);
}

#[test]
fn file_backed_service_survives_restart() {
    let dir = tempdir().unwrap();
    let key_path = dir.path().join("vault.key");
    let key = vaultsync_core::load_or_generate_key(&key_path).unwrap();

    let id = {
        let store = JournaledStore::open_dir(dir.path(), StoreConfig::default(), Arc::new(SystemClock))
            .unwrap();
        let context =
            HandlerContext::new(ServerConfig::default(), Arc::new(store), Arc::new(AesGcmCipher), key)
                .unwrap();
        let handler = RequestHandler::new(Arc::new(context));
        handler
            .store_member(member("Grace", "github").with_session("run-1"))
            .unwrap()
            .id
    };

    let key = vaultsync_core::load_or_generate_key(&key_path).unwrap();
    let store =
        JournaledStore::open_dir(dir.path(), StoreConfig::default(), Arc::new(SystemClock)).unwrap();
    let context =
        HandlerContext::new(ServerConfig::default(), Arc::new(store), Arc::new(AesGcmCipher), key)
            .unwrap();
    let handler = RequestHandler::new(Arc::new(context));

    let view = handler.get_record(id.as_str(), true).unwrap();
    assert_eq!(view.fields.unwrap()["name"], "Grace");
    assert_eq!(handler.stats().total_sessions, 1);
}

/// Delegates to an inner store, stalling every `put`.
struct SlowStore {
    inner: Arc<dyn RecordStore>,
    delay: Duration,
}

impl RecordStore for SlowStore {
    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }
    fn now(&self) -> Timestamp {
        self.inner.now()
    }
    fn put(&self, draft: RecordDraft) -> CoreResult<Record> {
        thread::sleep(self.delay);
        self.inner.put(draft)
    }
    fn get(&self, id: &RecordId) -> CoreResult<Record> {
        self.inner.get(id)
    }
    fn search(&self, query: &SearchQuery) -> CoreResult<SearchPage> {
        self.inner.search(query)
    }
    fn delete(&self, id: &RecordId) -> CoreResult<bool> {
        self.inner.delete(id)
    }
    fn sweep_expired(&self) -> CoreResult<usize> {
        self.inner.sweep_expired()
    }
    fn snapshot(&self, session_id: Option<&str>) -> Vec<Record> {
        self.inner.snapshot(session_id)
    }
    fn changes_since(&self, checkpoint: Checkpoint) -> Vec<ChangeEntry> {
        self.inner.changes_since(checkpoint)
    }
    fn latest_change(&self, id: &RecordId) -> Option<ChangeEntry> {
        self.inner.latest_change(id)
    }
    fn apply_if_unchanged(&self, mutation: Mutation, since: Timestamp) -> CoreResult<ApplyOutcome> {
        self.inner.apply_if_unchanged(mutation, since)
    }
    fn prune_changes(&self) -> CoreResult<usize> {
        self.inner.prune_changes()
    }
    fn horizon(&self) -> Timestamp {
        self.inner.horizon()
    }
    fn head(&self) -> Timestamp {
        self.inner.head()
    }
    fn live_count(&self) -> usize {
        self.inner.live_count()
    }
    fn session_count(&self) -> usize {
        self.inner.session_count()
    }
    fn storage_used(&self) -> u64 {
        self.inner.storage_used()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_storage_times_out_with_retryable_error() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let store: Arc<dyn RecordStore> = Arc::new(SlowStore {
        inner: memory_store(clock),
        delay: Duration::from_millis(300),
    });
    let config = ServerConfig::default().with_request_timeout(Duration::from_millis(50));
    let server = VaultServer::new(
        config,
        Arc::clone(&store),
        Arc::new(AesGcmCipher),
        EncryptionKey::generate(),
    )
    .unwrap();

    let response = server.handle(Request::StoreMember(member("Ada", "github"))).await;
    match response {
        Response::Error(body) => {
            assert_eq!(body.category, "storage_timeout");
            assert!(body.retryable);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }

    // Reads do not wait for the stalled write.
    let stats = server.handle(Request::Stats).await;
    assert!(matches!(stats, Response::Stats(_)));

    // Once the stalled write wakes up it must not land.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.live_count(), 0);
    assert_eq!(store.head(), Timestamp::ZERO);
    assert!(store.changes_since(Checkpoint::ORIGIN).is_empty());
}

async fn roundtrip(stream: &mut BufReader<TcpStream>, request: Value) -> Value {
    let mut line = request.to_string();
    line.push('\n');
    stream.get_mut().write_all(line.as_bytes()).await.unwrap();

    let mut reply = String::new();
    stream.read_line(&mut reply).await.unwrap();
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn tcp_clients_speak_line_delimited_json() {
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(START)));
    let server = VaultServer::new(
        ServerConfig::default().with_max_connections(4),
        memory_store(clock),
        Arc::new(AesGcmCipher),
        EncryptionKey::generate(),
    )
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(transport::serve(server, listener, async {
        let _ = stopped.await;
    }));

    let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
    let stored = roundtrip(
        &mut client,
        json!({"op": "storeMember", "fields": {"name": "Ada", "source": "linkedin"}, "ttlSeconds": 3600}),
    )
    .await;
    assert_eq!(stored["op"], "stored");
    assert_eq!(stored["expiresAt"], START + 3_600_000);

    let found = roundtrip(&mut client, json!({"op": "searchMembers", "source": "linkedin"})).await;
    assert_eq!(found["op"], "searchResults");
    assert_eq!(found["total"], 1);
    assert_eq!(found["results"][0]["id"], stored["id"]);

    let bad = roundtrip(&mut client, json!({"op": "searchMembers", "limit": 0})).await;
    assert_eq!(bad["op"], "error");
    assert_eq!(bad["category"], "validation");

    let backup = roundtrip(&mut client, json!({"op": "createBackup", "format": "json"})).await;
    assert_eq!(backup["op"], "backupCreated");
    assert_eq!(backup["recordCount"], 1);

    let stats = roundtrip(&mut client, json!({"op": "stats"})).await;
    assert_eq!(stats["totalRecords"], 1);
    assert_eq!(stats["backups"], 1);

    drop(client);
    stop.send(()).unwrap();
    serving.await.unwrap().unwrap();
}
