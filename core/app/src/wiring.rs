//! Assembly of the five record types into one sync engine.

use std::sync::Arc;
use tracing::info;

use fieldbook_common::{Clock, Entity, Error, Result, SystemClock};
use fieldbook_records::{Client, Finding, Inspection, Project, Structure};
use fieldbook_remote::{HttpRemote, MemoryRemote, RemoteApi};
use fieldbook_storage::{Database, LocalStore, MemoryStore, SqliteStore};
use fieldbook_sync::{
    Cascade, CursorStore, HandlerRegistry, PullCoordinator, RecordSync, SyncConfig, SyncEngine,
    SyncQueue, SyncScheduler, SyncSchedulerHandle, SyncStatus,
};

use crate::config::AppConfig;
use crate::repository::LocalRepository;

/// Local tables, one per record type.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn LocalStore<Client>>,
    pub projects: Arc<dyn LocalStore<Project>>,
    pub structures: Arc<dyn LocalStore<Structure>>,
    pub inspections: Arc<dyn LocalStore<Inspection>>,
    pub findings: Arc<dyn LocalStore<Finding>>,
}

impl Stores {
    /// Tables in the shared SQLite database.
    pub fn sqlite(db: &Database) -> Self {
        Self {
            clients: Arc::new(SqliteStore::<Client>::new(db.clone())),
            projects: Arc::new(SqliteStore::<Project>::new(db.clone())),
            structures: Arc::new(SqliteStore::<Structure>::new(db.clone())),
            inspections: Arc::new(SqliteStore::<Inspection>::new(db.clone())),
            findings: Arc::new(SqliteStore::<Finding>::new(db.clone())),
        }
    }

    pub fn memory() -> Self {
        Self {
            clients: Arc::new(MemoryStore::<Client>::new()),
            projects: Arc::new(MemoryStore::<Project>::new()),
            structures: Arc::new(MemoryStore::<Structure>::new()),
            inspections: Arc::new(MemoryStore::<Inspection>::new()),
            findings: Arc::new(MemoryStore::<Finding>::new()),
        }
    }
}

/// Remote collections, one per record type.
#[derive(Clone)]
pub struct Remotes {
    pub clients: Arc<dyn RemoteApi<Client>>,
    pub projects: Arc<dyn RemoteApi<Project>>,
    pub structures: Arc<dyn RemoteApi<Structure>>,
    pub inspections: Arc<dyn RemoteApi<Inspection>>,
    pub findings: Arc<dyn RemoteApi<Finding>>,
}

impl Remotes {
    /// REST collections under the configured base URL.
    pub fn http(config: &AppConfig) -> Result<Self> {
        let base = config.api_url()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Unexpected(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            clients: Arc::new(HttpRemote::<Client>::new(http.clone(), base.clone())),
            projects: Arc::new(HttpRemote::<Project>::new(http.clone(), base.clone())),
            structures: Arc::new(HttpRemote::<Structure>::new(http.clone(), base.clone())),
            inspections: Arc::new(HttpRemote::<Inspection>::new(http.clone(), base.clone())),
            findings: Arc::new(HttpRemote::<Finding>::new(http, base)),
        })
    }
}

/// In-process servers, kept concrete so tests can drive them.
#[derive(Clone, Default)]
pub struct MemoryServer {
    pub clients: Arc<MemoryRemote<Client>>,
    pub projects: Arc<MemoryRemote<Project>>,
    pub structures: Arc<MemoryRemote<Structure>>,
    pub inspections: Arc<MemoryRemote<Inspection>>,
    pub findings: Arc<MemoryRemote<Finding>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every collection on or off line.
    pub fn set_online(&self, online: bool) {
        self.clients.set_online(online);
        self.projects.set_online(online);
        self.structures.set_online(online);
        self.inspections.set_online(online);
        self.findings.set_online(online);
    }

    pub fn remotes(&self) -> Remotes {
        Remotes {
            clients: self.clients.clone(),
            projects: self.projects.clone(),
            structures: self.structures.clone(),
            inspections: self.inspections.clone(),
            findings: self.findings.clone(),
        }
    }
}

/// A wired Fieldbook installation.
pub struct Fieldbook {
    pub clients: LocalRepository<Client>,
    pub projects: LocalRepository<Project>,
    pub structures: LocalRepository<Structure>,
    pub inspections: LocalRepository<Inspection>,
    pub findings: LocalRepository<Finding>,
    engine: Arc<SyncEngine>,
    puller: Arc<PullCoordinator>,
}

impl Fieldbook {
    /// Open the installation described by `config`: SQLite under the data
    /// directory and the REST API.
    pub fn open(config: &AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::open(config.database_path())?;

        Self::assemble(
            db.clone(),
            Stores::sqlite(&db),
            Remotes::http(config)?,
            Arc::new(SystemClock::new()),
            &config.sync,
        )
    }

    /// Wire stores and remotes into handlers, the engine and the pull
    /// coordinator. Queue and cursors live in `db`.
    pub fn assemble(
        db: Database,
        stores: Stores,
        remotes: Remotes,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Result<Self> {
        // Parents before children.
        let cascade = Arc::new(
            Cascade::new()
                .with_store(stores.clients.clone())
                .with_store(stores.projects.clone())
                .with_store(stores.structures.clone())
                .with_store(stores.inspections.clone())
                .with_store(stores.findings.clone()),
        );

        let clients = record_sync(&stores.clients, remotes.clients, &cascade);
        let projects = record_sync(&stores.projects, remotes.projects, &cascade);
        let structures = record_sync(&stores.structures, remotes.structures, &cascade);
        let inspections = record_sync(&stores.inspections, remotes.inspections, &cascade);
        let findings = record_sync(&stores.findings, remotes.findings, &cascade);

        let mut handlers = HandlerRegistry::new();
        handlers.register(clients.clone())?;
        handlers.register(projects.clone())?;
        handlers.register(structures.clone())?;
        handlers.register(inspections.clone())?;
        handlers.register(findings.clone())?;

        let queue = Arc::new(SyncQueue::new(db.clone())?);
        let engine = Arc::new(
            SyncEngine::new(queue, handlers, clock).with_halt_policy(config.halt_policy),
        );

        let mut puller = PullCoordinator::new(engine.clone(), Arc::new(CursorStore::new(db)?));
        puller.register(clients)?;
        puller.register(projects)?;
        puller.register(structures)?;
        puller.register(inspections)?;
        puller.register(findings)?;

        info!("Sync engine wired for {} entity types", engine.handlers().len());

        Ok(Self {
            clients: LocalRepository::new(stores.clients, engine.clone(), cascade.clone()),
            projects: LocalRepository::new(stores.projects, engine.clone(), cascade.clone()),
            structures: LocalRepository::new(stores.structures, engine.clone(), cascade.clone()),
            inspections: LocalRepository::new(stores.inspections, engine.clone(), cascade.clone()),
            findings: LocalRepository::new(stores.findings, engine.clone(), cascade),
            engine,
            puller: Arc::new(puller),
        })
    }

    /// In-memory installation talking to `server`; for tests and demos.
    pub fn in_memory(server: &MemoryServer, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::assemble(
            Database::in_memory()?,
            Stores::memory(),
            server.remotes(),
            clock,
            &SyncConfig::default(),
        )
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn puller(&self) -> &Arc<PullCoordinator> {
        &self.puller
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status().status()
    }

    /// Background worker for this installation; spawn the handle's `run`.
    pub fn scheduler(&self, config: &AppConfig) -> (SyncScheduler, SyncSchedulerHandle) {
        SyncScheduler::new(self.puller.clone(), config.scheduler_config())
    }
}

fn record_sync<E: Entity>(
    store: &Arc<dyn LocalStore<E>>,
    remote: Arc<dyn RemoteApi<E>>,
    cascade: &Arc<Cascade>,
) -> Arc<RecordSync<E>> {
    Arc::new(RecordSync::new(store.clone(), remote, cascade.clone()))
}
