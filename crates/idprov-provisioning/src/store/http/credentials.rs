//! Auth provider admin API client
//!
//! Credentials live under `{base}/auth/v1/admin/users`. The provider hashes
//! passwords; this client only ever sends them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use idprov_common::{Credential, CredentialUpdate, NewCredential, Resource};
use idprov_config::CredentialStoreConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{build_client, expect_success, read_json, send, Endpoint, HttpStoreError};
use crate::error::{StoreError, StoreResult};
use crate::store::CredentialStore;

const USERS_PATH: [&str; 4] = ["auth", "v1", "admin", "users"];

/// Default upper bound on pages fetched by one list call.
const MAX_PAGES: u32 = 1_000;

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<UserRecord> for Credential {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email.unwrap_or_default(),
            confirmed: record.email_confirmed_at.is_some(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserPage {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Serialize)]
struct CreateUserBody<'a> {
    email: &'a str,
    password: &'a str,
    email_confirm: bool,
}

#[derive(Serialize)]
struct UpdateUserBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
}

/// Credential store backed by the auth provider's admin API.
pub struct AuthAdminClient {
    client: Client,
    endpoint: Endpoint,
    page_size: u32,
    max_pages: u32,
}

impl AuthAdminClient {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, HttpStoreError> {
        Self::from_config(&CredentialStoreConfig {
            base_url: base_url.to_string(),
            service_key: service_key.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &CredentialStoreConfig) -> Result<Self, HttpStoreError> {
        Ok(Self {
            client: build_client(config.timeout_ms, config.connect_timeout_ms)?,
            endpoint: Endpoint::new(&config.base_url, &config.service_key)?,
            page_size: config.page_size.max(1),
            max_pages: MAX_PAGES,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Stop listing after `max_pages` full pages.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn user_url(&self, id: &str) -> reqwest::Url {
        let mut url = self.endpoint.url(&USERS_PATH);
        if let Ok(mut path) = url.path_segments_mut() {
            path.push(id);
        }
        url
    }
}

#[async_trait]
impl CredentialStore for AuthAdminClient {
    async fn get_credential(&self, id: &str) -> StoreResult<Option<Credential>> {
        debug!(id, "Fetching credential");
        let request = self.endpoint.authorize(self.client.get(self.user_url(id)));
        let response = send(Resource::Credential, request).await?;

        match read_json::<UserRecord>(Resource::Credential, id, response).await {
            Ok(record) => Ok(Some(record.into())),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_credential(&self, new: &NewCredential) -> StoreResult<Credential> {
        debug!(email = %new.email, "Creating credential");
        let body = CreateUserBody {
            email: &new.email,
            password: &new.password,
            email_confirm: new.confirmed,
        };
        let request = self
            .endpoint
            .authorize(self.client.post(self.endpoint.url(&USERS_PATH)))
            .json(&body);
        let response = send(Resource::Credential, request).await?;

        let record: UserRecord = read_json(Resource::Credential, &new.email, response).await?;
        Ok(record.into())
    }

    async fn update_credential(&self, id: &str, update: &CredentialUpdate) -> StoreResult<()> {
        debug!(id, ?update, "Updating credential");
        let body = UpdateUserBody {
            email: update.email.as_deref(),
            password: update.password.as_deref(),
        };
        let request = self
            .endpoint
            .authorize(self.client.put(self.user_url(id)))
            .json(&body);
        let response = send(Resource::Credential, request).await?;

        match expect_success(Resource::Credential, id, response).await {
            // A taken email on update is a caller conflict, not an idempotent insert
            Err(StoreError::AlreadyExists { resource, key }) => Err(StoreError::rejected(
                resource,
                format!("email already in use ({})", key),
            )),
            other => other,
        }
    }

    async fn delete_credential(&self, id: &str) -> StoreResult<()> {
        debug!(id, "Deleting credential");
        let request = self.endpoint.authorize(self.client.delete(self.user_url(id)));
        let response = send(Resource::Credential, request).await?;
        expect_success(Resource::Credential, id, response).await
    }

    async fn list_credentials(&self) -> StoreResult<Vec<Credential>> {
        let mut credentials = Vec::new();

        for page in 1..=self.max_pages {
            let request = self
                .endpoint
                .authorize(self.client.get(self.endpoint.url(&USERS_PATH)))
                .query(&[("page", page), ("per_page", self.page_size)]);
            let response = send(Resource::Credential, request).await?;
            let batch: UserPage = read_json(Resource::Credential, "", response).await?;

            let fetched = batch.users.len();
            credentials.extend(batch.users.into_iter().map(Credential::from));
            debug!(page, fetched, "Fetched credential page");

            if fetched < self.page_size as usize {
                return Ok(credentials);
            }
        }

        warn!(
            max_pages = self.max_pages,
            fetched = credentials.len(),
            "Credential listing hit the page cap, remaining users were not fetched"
        );
        Ok(credentials)
    }
}
