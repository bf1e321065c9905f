//! HTTP client for the Fieldbook REST API.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::marker::PhantomData;
use tracing::debug;
use url::Url;

use fieldbook_common::{
    DeleteOutcome, Entity, EntityId, Error, Result, Timestamp, UpsertOutcome,
};

use crate::api::{RemoteApi, RemoteChange};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody {
    deleted_at: Timestamp,
}

/// Map a transport error onto the sync error taxonomy.
fn classify(err: reqwest::Error) -> Error {
    if err.is_connect() || err.is_timeout() {
        Error::Offline(err.to_string())
    } else if let Some(status) = err.status() {
        Error::Rejected {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        Error::Unexpected(err.to_string())
    }
}

/// Turn a non-success status into `Error::Rejected`.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Unexpected(format!("Malformed response body: {}", e)))
}

/// REST client for one entity type.
pub struct HttpRemote<E: Entity> {
    http: Client,
    base: Url,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> HttpRemote<E> {
    /// Create a client rooted at `base` (e.g. `https://api.example.com/v1`).
    ///
    /// The reqwest client is shared across entity types so connections are
    /// pooled.
    pub fn new(http: Client, base: Url) -> Self {
        Self {
            http,
            base,
            _entity: PhantomData,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut raw = self.base.as_str().trim_end_matches('/').to_string();
        for segment in segments {
            raw.push('/');
            raw.extend(utf8_percent_encode(segment, SEGMENT));
        }
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid API URL {}: {}", raw, e)))
    }

    /// `/<parent>/<scope>/<entities>` or `/<entities>`.
    pub fn collection_url(&self, scope: Option<&EntityId>) -> Result<Url> {
        match (E::PARENT_TYPE_ID, scope) {
            (Some(parent), Some(scope)) => self.url(&[parent, scope.as_str(), E::TYPE_ID]),
            (None, Some(_)) => Err(Error::InvalidInput(format!(
                "{} records have no parent scope",
                E::TYPE_ID
            ))),
            (_, None) => self.url(&[E::TYPE_ID]),
        }
    }

    /// `/<entities>/<id>`.
    pub fn entity_url(&self, id: &EntityId) -> Result<Url> {
        self.url(&[E::TYPE_ID, id.as_str()])
    }
}

#[async_trait]
impl<E: Entity> RemoteApi<E> for HttpRemote<E> {
    fn name(&self) -> &str {
        "http"
    }

    async fn modified_since(
        &self,
        scope: Option<&EntityId>,
        since: Timestamp,
    ) -> Result<Vec<RemoteChange<E>>> {
        let url = self.collection_url(scope)?;
        debug!("GET {} since {}", url, since);

        let response = self
            .http
            .get(url)
            .query(&[("since", since.as_millis())])
            .send()
            .await
            .map_err(classify)?;

        let entities: Vec<E> = read_json(check_status(response).await?).await?;
        Ok(entities.into_iter().map(RemoteChange::from_entity).collect())
    }

    async fn upsert(&self, entity: &E) -> Result<UpsertOutcome<E>> {
        let url = self.entity_url(entity.id())?;
        debug!("PUT {}", url);

        let response = self
            .http
            .put(url)
            .json(entity)
            .send()
            .await
            .map_err(classify)?;
        let response = check_status(response).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(UpsertOutcome::Accepted);
        }

        let current: E = read_json(response).await?;
        if &current == entity {
            Ok(UpsertOutcome::Accepted)
        } else {
            Ok(UpsertOutcome::RejectedWithCurrent(current))
        }
    }

    async fn delete(&self, id: &EntityId, deleted_at: Timestamp) -> Result<DeleteOutcome<E>> {
        let url = self.entity_url(id)?;
        debug!("DELETE {} at {}", url, deleted_at);

        let response = self
            .http
            .delete(url)
            .json(&DeleteBody { deleted_at })
            .send()
            .await
            .map_err(classify)?;

        // The server has never seen the record; nothing left to delete.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::Accepted);
        }

        let response = check_status(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(DeleteOutcome::Accepted);
        }

        let current: E = read_json(response).await?;
        if current.is_deleted() {
            Ok(DeleteOutcome::AlreadyDeleted)
        } else {
            Ok(DeleteOutcome::RejectedWithCurrent(current))
        }
    }
}
