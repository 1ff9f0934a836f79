//! Cloud Firestore backend over the v1 REST API.
//!
//! [`FirestoreClient`] implements [`DocumentStore`] for one database of one
//! project. It authenticates with a service-account key, or talks to a local
//! emulator when `FIRESTORE_EMULATOR_HOST` is set.
//!
//! ```rust,no_run
//! use firemirror::prelude::*;
//! # async fn example() -> Result<(), StoreError> {
//! let credentials = Credentials::from_file("service-account.json")?;
//! let client = FirestoreClient::new(&credentials, FirestoreConfig::default())?;
//! for collection in client.list_root_collections().await? {
//!     println!("{collection}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Listing a collection only returns documents that have fields. A document
//! that exists only as the parent of a sub-collection ("missing" in Firestore
//! terms) is not listed, so its sub-collections are not reached.
//!
mod auth;
mod http;
pub mod wire;

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize, de::IgnoredAny};
use snafu::ResultExt;
use tracing::debug;

pub use self::auth::{Credentials, TokenProvider};
use self::{
    http::{HttpClient, HttpRequest},
    wire::{WireDocument, WireValue, decode_fields, encode_fields},
};
use crate::{
    address::Address,
    config::{
        DEFAULT_DATABASE, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE, FIRESTORE_API_URL,
        FIRESTORE_EMULATOR_HOST_ENV,
    },
    error::{HttpSnafu, StoreError},
    store::{DocumentSnapshot, DocumentStore},
    value::FieldMap,
};

/// Connection settings for a [`FirestoreClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirestoreConfig {
    /// Project to connect to. Defaults to the project of the credentials.
    pub project_id: Option<String>,

    /// Database id within the project, `(default)` unless set.
    pub database: String,

    /// `host:port` of a Firestore emulator.
    /// Defaults to the environment variable `FIRESTORE_EMULATOR_HOST`, if defined.
    pub emulator_host: Option<String>,

    /// Page size for list requests.
    pub page_size: u32,

    /// Retries for connection errors, timeouts and busy-server responses.
    pub max_retries: u32,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        FirestoreConfig {
            project_id: None,
            database: DEFAULT_DATABASE.to_string(),
            emulator_host: std::env::var(FIRESTORE_EMULATOR_HOST_ENV)
                .ok()
                .filter(|host| !host.is_empty()),
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl FirestoreConfig {
    pub fn project_id(self, project_id: impl Into<String>) -> Self {
        FirestoreConfig {
            project_id: Some(project_id.into()),
            ..self
        }
    }

    pub fn database(self, database: impl Into<String>) -> Self {
        FirestoreConfig {
            database: database.into(),
            ..self
        }
    }

    /// Sets or clears the emulator host.
    pub fn emulator_host(self, emulator_host: Option<String>) -> Self {
        FirestoreConfig {
            emulator_host,
            ..self
        }
    }

    pub fn page_size(self, page_size: u32) -> Self {
        FirestoreConfig {
            page_size: page_size.max(1),
            ..self
        }
    }

    pub fn max_retries(self, max_retries: u32) -> Self {
        FirestoreConfig {
            max_retries,
            ..self
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionIdsRequest<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCollectionIdsResponse {
    #[serde(default)]
    collection_ids: Vec<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<WireDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Serialize)]
struct PatchDocumentRequest {
    fields: std::collections::BTreeMap<String, WireValue>,
}

/// A Firestore database reached over REST.
#[derive(Debug)]
pub struct FirestoreClient {
    http: HttpClient,
    /// `https://firestore.googleapis.com/v1/`
    base_url: Url,
    /// `projects/<p>/databases/<d>/documents`
    database_path: String,
    project_id: String,
    database: String,
    page_size: u32,
}

impl FirestoreClient {
    pub fn new(credentials: &Credentials, config: FirestoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context(HttpSnafu {
                method: "client-init",
                url: "",
            })?;

        let (base_url, tokens) = match &config.emulator_host {
            Some(host) => {
                debug!(%host, "using Firestore emulator");
                (
                    format!("http://{host}/v1/"),
                    TokenProvider::emulator(client.clone()),
                )
            }
            None => (
                FIRESTORE_API_URL.to_string(),
                TokenProvider::service_account(credentials, client.clone())?,
            ),
        };
        let base_url = Url::parse(&base_url).map_err(|err| StoreError::Other {
            message: format!("invalid Firestore url '{base_url}': {err}"),
        })?;

        let project_id = config
            .project_id
            .unwrap_or_else(|| credentials.project_id.clone());
        let database_path = format!(
            "projects/{project_id}/databases/{}/documents",
            config.database
        );
        Ok(Self {
            http: HttpClient::new(client, tokens, config.max_retries),
            base_url,
            database_path,
            project_id,
            database: config.database,
            page_size: config.page_size.max(1),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Resource name prefix of documents in this database.
    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    /// URL of the documents root, followed by `segments`.
    /// `method` is appended to the last segment as `:<method>`.
    fn documents_url(&self, segments: &[String], method: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| StoreError::Other {
                message: format!("cannot append to url {}", self.base_url),
            })?;
            path.pop_if_empty()
                .extend(["projects", self.project_id.as_str(), "databases", self.database.as_str()]);
            let (last, parents) = match segments.split_last() {
                Some((last, parents)) => (last.as_str(), parents),
                None => ("documents", &[][..]),
            };
            if !segments.is_empty() {
                path.push("documents");
            }
            path.extend(parents);
            match method {
                Some(method) => path.push(&format!("{last}:{method}")),
                None => path.push(last),
            };
        }
        Ok(url)
    }

    async fn list_collection_ids(&self, parent: &[String]) -> Result<Vec<String>, StoreError> {
        let url = self.documents_url(parent, Some("listCollectionIds"))?;
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let body = ListCollectionIdsRequest {
                page_size: self.page_size,
                page_token: page_token.as_deref(),
            };
            let req = HttpRequest::with_json(Method::POST, url.clone(), &body)?;
            let page: ListCollectionIdsResponse = self.http.send(req).await?;
            ids.extend(page.collection_ids);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(ids)
    }
}

impl DocumentStore for FirestoreClient {
    async fn list_root_collections(&self) -> Result<Vec<String>, StoreError> {
        self.list_collection_ids(&[]).await
    }

    async fn list_documents(&self, collection: &Address) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let base = self.documents_url(collection.segments(), None)?;
        let mut snapshots = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("pageSize", &self.page_size.to_string());
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ListDocumentsResponse = self.http.send(HttpRequest::get(url)).await?;
            for document in page.documents {
                let id = document.id().to_string();
                let fields = decode_fields(document.fields, &self.database_path).map_err(
                    |message| StoreError::UnsupportedValue {
                        document: document.name.clone(),
                        message,
                    },
                )?;
                snapshots.push(DocumentSnapshot::new(id, fields));
            }
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        debug!(collection = %collection, count = snapshots.len(), "listed documents");
        Ok(snapshots)
    }

    async fn list_subcollections(&self, document: &Address) -> Result<Vec<String>, StoreError> {
        self.list_collection_ids(document.segments()).await
    }

    async fn set_document(&self, document: &Address, fields: &FieldMap) -> Result<(), StoreError> {
        if !document.is_document() {
            return Err(StoreError::Other {
                message: format!("'{document}' is not a document address"),
            });
        }
        let url = self.documents_url(document.segments(), None)?;
        let body = PatchDocumentRequest {
            fields: encode_fields(fields, &self.database_path),
        };
        let _: IgnoredAny = self
            .http
            .send(HttpRequest::with_json(Method::PATCH, url, &body)?)
            .await?;
        Ok(())
    }
}
