use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;

use fieldbook_app::{Fieldbook, MemoryServer, Stores};
use fieldbook_common::{Clock, Entity, EntityId, Error, ManualClock, Result, Timestamp};
use fieldbook_records::{Client, Finding, Inspection, Project, Severity, Structure};
use fieldbook_remote::Request;
use fieldbook_storage::{Database, LocalStore, MemoryStore};
use fieldbook_sync::{CursorKey, OperationType, SyncConfig, SyncStatus};
use tempfile::TempDir;

fn setup() -> (MemoryServer, Arc<ManualClock>, Fieldbook) {
    let server = MemoryServer::new();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let app = Fieldbook::in_memory(&server, clock.clone()).unwrap();
    (server, clock, app)
}

/// A client with one project, structure, inspection and finding.
async fn seed_site(app: &Fieldbook, clock: &ManualClock) -> (Client, Project, Structure, Finding) {
    let mut client = Client::new("Harbour Authority");
    app.clients.save(&mut client).await.unwrap();
    clock.advance(1);

    let mut project = Project::new(client.id.clone(), "Quay wall");
    app.projects.save(&mut project).await.unwrap();
    clock.advance(1);

    let mut structure = Structure::new(project.id.clone(), "Berth 4");
    app.structures.save(&mut structure).await.unwrap();
    clock.advance(1);

    let mut inspection = Inspection::new(project.id.clone(), "M. Osei");
    app.inspections.save(&mut inspection).await.unwrap();
    clock.advance(1);

    let mut finding = Finding::new(structure.id.clone(), "Corroded bollard").with_severity(Severity::High);
    app.findings.save(&mut finding).await.unwrap();
    clock.advance(1);

    (client, project, structure, finding)
}

#[tokio::test]
async fn test_offline_edits_are_pushed_in_order() {
    let (server, clock, app) = setup();
    server.set_online(false);

    let (client, project, structure, finding) = seed_site(&app, &clock).await;

    assert_eq!(app.engine().queue().len().unwrap(), 5);
    assert!(!app.engine().drain().await.is_complete());
    assert_eq!(app.status(), SyncStatus::Offline);

    server.set_online(true);
    let report = app.engine().drain().await;

    assert!(report.is_complete());
    assert_eq!(report.applied, 5);
    assert_eq!(app.status(), SyncStatus::Synced);
    assert_eq!(server.clients.get(&client.id), Some(client));
    assert_eq!(server.projects.get(&project.id), Some(project));
    assert_eq!(server.structures.get(&structure.id), Some(structure));
    assert_eq!(server.findings.get(&finding.id), Some(finding));
}

#[tokio::test]
async fn test_save_stamps_with_clock() {
    let (_server, clock, app) = setup();
    clock.set(Timestamp::from_millis(4_242));

    let mut client = Client::new("Acme");
    app.clients.save(&mut client).await.unwrap();

    assert_eq!(client.updated_at(), Timestamp::from_millis(4_242));
    let pending = app.engine().queue().get_all_pending().unwrap();
    assert_eq!(pending[0].stamped_at, Timestamp::from_millis(4_242));
    assert_eq!(pending[0].operation, OperationType::Upsert);
}

#[tokio::test]
async fn test_deleted_record_cannot_be_saved() {
    let (_server, _clock, app) = setup();
    let mut client = Client::new("Acme");
    client.set_deleted_at(Timestamp::from_millis(5));

    let err = app.clients.save(&mut client).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(app.engine().queue().is_empty().unwrap());
}

#[tokio::test]
async fn test_delete_cascades_and_queues_children_first() {
    let (server, clock, app) = setup();
    let (_client, project, structure, finding) = seed_site(&app, &clock).await;
    app.engine().drain().await;

    let removed = app.projects.delete(&project.id).await.unwrap();
    let order: Vec<_> = removed.iter().map(|r| r.entity_type_id.as_str()).collect();
    assert_eq!(order, vec!["findings", "structures", "inspections", "projects"]);

    assert!(app.structures.get(&structure.id).await.unwrap().is_none());
    assert!(app.findings.get(&finding.id).await.unwrap().is_none());

    let pending = app.engine().queue().get_all_pending().unwrap();
    let types: Vec<_> = pending.iter().map(|op| op.entity_type_id.as_str()).collect();
    assert_eq!(types, vec!["findings", "structures", "inspections", "projects"]);
    assert!(pending.iter().all(|op| op.operation == OperationType::Delete));

    app.engine().drain().await;
    let stamp = clock.now();
    assert_eq!(
        server.projects.get(&project.id).and_then(|p| p.deleted_at()),
        Some(stamp)
    );
    assert_eq!(
        server.findings.get(&finding.id).and_then(|f| f.deleted_at()),
        Some(stamp)
    );
}

/// Project table that cannot delete anything.
struct UndeletableProjects(MemoryStore<Project>);

#[async_trait]
impl LocalStore<Project> for UndeletableProjects {
    fn name(&self) -> &str {
        "undeletable"
    }

    async fn get(&self, id: &EntityId) -> Result<Option<Project>> {
        self.0.get(id).await
    }

    async fn get_all(&self, scope: Option<&EntityId>) -> Result<Vec<Project>> {
        self.0.get_all(scope).await
    }

    async fn save(&self, entity: &Project) -> Result<()> {
        self.0.save(entity).await
    }

    async fn delete(&self, _id: &EntityId) -> Result<()> {
        Err(Error::Storage("disk full".to_string()))
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.0.changes()
    }
}

#[tokio::test]
async fn test_interrupted_delete_still_queues_removed_children() {
    let server = MemoryServer::new();
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_000)));
    let mut stores = Stores::memory();
    stores.projects = Arc::new(UndeletableProjects(MemoryStore::<Project>::new()));
    let app = Fieldbook::assemble(
        Database::in_memory().unwrap(),
        stores,
        server.remotes(),
        clock.clone(),
        &SyncConfig::default(),
    )
    .unwrap();
    let (_client, project, structure, finding) = seed_site(&app, &clock).await;
    app.engine().drain().await;

    let err = app.projects.delete(&project.id).await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(app.structures.get(&structure.id).await.unwrap().is_none());
    assert!(app.projects.get(&project.id).await.unwrap().is_some());

    let pending = app.engine().queue().get_all_pending().unwrap();
    let types: Vec<_> = pending.iter().map(|op| op.entity_type_id.as_str()).collect();
    assert_eq!(types, vec!["findings", "structures", "inspections"]);
    assert!(pending.iter().all(|op| op.operation == OperationType::Delete));

    assert!(app.engine().drain().await.is_complete());
    assert!(server.structures.get(&structure.id).unwrap().deleted_at().is_some());
    assert!(server.findings.get(&finding.id).unwrap().deleted_at().is_some());
    assert!(server.projects.get(&project.id).unwrap().deleted_at().is_none());
}

#[tokio::test]
async fn test_server_edit_after_local_delete_restores_record() {
    let (server, clock, app) = setup();
    let mut client = Client::new("Acme");
    app.clients.save(&mut client).await.unwrap();
    app.engine().drain().await;

    // Another device edits the record later than our delete will be stamped.
    let mut edited = client.clone();
    edited.name = "Acme (renamed)".to_string();
    edited.set_updated_at(Timestamp::from_millis(9_000));
    server.clients.seed(edited.clone());

    clock.set(Timestamp::from_millis(5_000));
    app.clients.delete(&client.id).await.unwrap();
    let report = app.engine().drain().await;

    assert!(report.is_complete());
    assert_eq!(app.clients.get(&client.id).await.unwrap(), Some(edited));
}

#[tokio::test]
async fn test_observers_see_pulled_changes() {
    let (server, clock, app) = setup();
    let mut remote_client = Client::new("Remote Co");
    remote_client.set_updated_at(Timestamp::from_millis(500));
    server.clients.seed(remote_client.clone());

    let mut stream = app.clients.observe(&remote_client.id);
    assert_eq!(stream.next().await.unwrap().unwrap(), None);

    clock.set(Timestamp::from_millis(2_000));
    app.puller().pull(&CursorKey::unscoped("clients")).await.unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), Some(remote_client));
}

#[tokio::test]
async fn test_scoped_inspection_pull() {
    let (server, clock, app) = setup();
    let mut project = Project::new(Client::new("c").id, "Tunnel");
    app.projects.save(&mut project).await.unwrap();
    app.engine().drain().await;

    let mut ours = Inspection::new(project.id.clone(), "A. Ruiz");
    ours.set_updated_at(Timestamp::from_millis(900));
    let mut other = Inspection::new(Project::new(Client::new("d").id, "Other").id, "B. Lee");
    other.set_updated_at(Timestamp::from_millis(900));
    server.inspections.seed(ours.clone());
    server.inspections.seed(other);

    clock.set(Timestamp::from_millis(3_000));
    let key = CursorKey::scoped("inspections", project.id.clone());
    let report = app.puller().pull(&key).await.unwrap();

    assert_eq!(report.stats.updated, 1);
    assert_eq!(app.inspections.list(Some(&project.id)).await.unwrap(), vec![ours]);
    assert_eq!(app.inspections.list(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sqlite_installation_survives_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("fieldbook.db");
    let server = MemoryServer::new();
    server.set_online(false);
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(100)));

    let client = {
        let db = Database::open(&path).unwrap();
        let app = Fieldbook::assemble(
            db.clone(),
            Stores::sqlite(&db),
            server.remotes(),
            clock.clone(),
            &SyncConfig::default(),
        )
        .unwrap();
        let mut client = Client::new("Durable Ltd");
        app.clients.save(&mut client).await.unwrap();
        app.engine().drain().await;
        client
    };

    server.set_online(true);
    let db = Database::open(&path).unwrap();
    let app = Fieldbook::assemble(
        db.clone(),
        Stores::sqlite(&db),
        server.remotes(),
        clock,
        &SyncConfig::default(),
    )
    .unwrap();

    assert_eq!(app.clients.get(&client.id).await.unwrap(), Some(client.clone()));
    let report = app.engine().drain().await;
    assert_eq!(report.applied, 1);
    assert_eq!(server.clients.get(&client.id), Some(client.clone()));
    assert_eq!(server.clients.requests(), vec![Request::Upsert(client.id)]);
}
