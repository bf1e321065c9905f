//! Shared wiring for integration tests: clients and projects backed by
//! in-memory stores, an in-memory server, and a SQLite queue.

#![allow(dead_code)]

use std::sync::Arc;

use fieldbook_common::{Clock, Entity, EntityId, ManualClock, Timestamp};
use fieldbook_records::{Client, Project};
use fieldbook_remote::{MemoryRemote, RemoteApi};
use fieldbook_storage::{Database, LocalStore, MemoryStore};
use fieldbook_sync::{
    Cascade, CursorStore, HandlerRegistry, OperationType, PullCoordinator, RecordSync,
    SyncEngine, SyncQueue,
};

pub struct Device {
    pub clock: Arc<ManualClock>,
    pub clients: Arc<MemoryStore<Client>>,
    pub projects: Arc<MemoryStore<Project>>,
    pub cascade: Arc<Cascade>,
    pub engine: Arc<SyncEngine>,
    pub puller: Arc<PullCoordinator>,
}

pub struct Server {
    pub clients: Arc<MemoryRemote<Client>>,
    pub projects: Arc<MemoryRemote<Project>>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(MemoryRemote::new()),
            projects: Arc::new(MemoryRemote::new()),
        }
    }
}

impl Device {
    pub fn new(server: &Server, db: Database, start: i64) -> Self {
        Self::with_remotes(server.clients.clone(), server.projects.clone(), db, start)
    }

    /// A device talking to arbitrary client and project endpoints.
    pub fn with_remotes(
        client_remote: Arc<dyn RemoteApi<Client>>,
        project_remote: Arc<dyn RemoteApi<Project>>,
        db: Database,
        start: i64,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(start)));
        let clients = Arc::new(MemoryStore::<Client>::new());
        let projects = Arc::new(MemoryStore::<Project>::new());
        let cascade = Arc::new(
            Cascade::new()
                .with_store::<Client>(clients.clone())
                .with_store::<Project>(projects.clone()),
        );

        let client_sync = Arc::new(RecordSync::<Client>::new(
            clients.clone(),
            client_remote,
            cascade.clone(),
        ));
        let project_sync = Arc::new(RecordSync::<Project>::new(
            projects.clone(),
            project_remote,
            cascade.clone(),
        ));

        let mut handlers = HandlerRegistry::new();
        handlers.register(client_sync.clone()).unwrap();
        handlers.register(project_sync.clone()).unwrap();

        let queue = Arc::new(SyncQueue::new(db.clone()).unwrap());
        let engine = Arc::new(SyncEngine::new(queue, handlers, clock.clone()));

        let mut puller = PullCoordinator::new(
            engine.clone(),
            Arc::new(CursorStore::new(db).unwrap()),
        );
        puller.register(client_sync).unwrap();
        puller.register(project_sync).unwrap();

        Self {
            clock,
            clients,
            projects,
            cascade,
            engine,
            puller: Arc::new(puller),
        }
    }

    pub fn in_memory(server: &Server, start: i64) -> Self {
        Self::new(server, Database::in_memory().unwrap(), start)
    }

    /// Local edit: stamp, save, enqueue.
    pub async fn save_client(&self, client: &mut Client) {
        let _writes = self.cascade.write_lock().lock().await;
        client.set_updated_at(self.clock.now());
        self.clients.save(client).await.unwrap();
        self.engine
            .enqueue_at(
                Client::TYPE_ID,
                &client.id,
                OperationType::Upsert,
                client.updated_at,
            )
            .unwrap();
    }

    /// Local delete: remove, enqueue.
    pub async fn delete_client(&self, id: &EntityId) {
        let _writes = self.cascade.write_lock().lock().await;
        self.clients.delete(id).await.unwrap();
        self.engine
            .enqueue("clients", id, OperationType::Delete)
            .unwrap();
    }

    pub fn pending(&self) -> Vec<(String, OperationType)> {
        self.engine
            .queue()
            .get_all_pending()
            .unwrap()
            .into_iter()
            .map(|op| (op.entity_id.to_string(), op.operation))
            .collect()
    }
}

pub fn client(id: &str, name: &str) -> Client {
    let mut client = Client::new(name);
    client.id = EntityId::from(id);
    client
}
