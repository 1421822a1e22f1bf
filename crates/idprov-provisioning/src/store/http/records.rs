//! Table REST API client for profiles and role assignments
//!
//! Rows are addressed with `{base}/rest/v1/{table}?{key}=eq.{value}`. Filtered
//! reads return arrays, so a missing row is an empty array rather than a 404;
//! a 404 here means the table itself is missing and is reported as `Rejected`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use idprov_common::{Profile, ProfileUpdate, Resource, Role, RoleAssignment};
use idprov_config::RecordStoreConfig;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_client, expect_success, read_json, send, Endpoint, HttpStoreError};
use crate::error::{StoreError, StoreResult};
use crate::store::{ProfileStore, RoleStore};

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            name: row.name.unwrap_or_default(),
            email: row.email,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
struct NewProfileRow<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Serialize)]
struct ProfilePatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoleRow {
    user_id: String,
    role: String,
}

impl TryFrom<RoleRow> for RoleAssignment {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::rejected(Resource::Role, e.to_string()))?;
        Ok(RoleAssignment::new(row.user_id, role))
    }
}

#[derive(Serialize)]
struct RolePatch<'a> {
    role: &'a str,
}

/// Profile and role store backed by the table REST API.
pub struct RecordStoreClient {
    client: Client,
    endpoint: Endpoint,
    profiles_table: String,
    roles_table: String,
}

impl RecordStoreClient {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self, HttpStoreError> {
        Self::from_config(&RecordStoreConfig {
            base_url: base_url.to_string(),
            service_key: service_key.to_string(),
            ..Default::default()
        })
    }

    pub fn from_config(config: &RecordStoreConfig) -> Result<Self, HttpStoreError> {
        Ok(Self {
            client: build_client(config.timeout_ms, config.connect_timeout_ms)?,
            endpoint: Endpoint::new(&config.base_url, &config.service_key)?,
            profiles_table: config.profiles_table.clone(),
            roles_table: config.roles_table.clone(),
        })
    }

    fn table(&self, method: reqwest::Method, table: &str) -> RequestBuilder {
        let url = self.endpoint.url(&["rest", "v1", table]);
        self.endpoint.authorize(self.client.request(method, url))
    }

    fn keyed(&self, method: reqwest::Method, table: &str, column: &str, value: &str) -> RequestBuilder {
        self.table(method, table)
            .query(&[(column, format!("eq.{}", value))])
    }

    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        resource: Resource,
        table: &str,
        column: &str,
        value: &str,
    ) -> StoreResult<Option<T>> {
        let request = self
            .keyed(reqwest::Method::GET, table, column, value)
            .query(&[("select", "*")]);
        let response = send(resource, request).await?;
        let rows: Vec<T> = read_json(resource, value, response)
            .await
            .map_err(missing_table)?;
        Ok(rows.into_iter().next())
    }

    async fn insert<B: Serialize + ?Sized>(
        &self,
        resource: Resource,
        table: &str,
        key: &str,
        body: &B,
    ) -> StoreResult<()> {
        let request = self
            .table(reqwest::Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(body);
        let response = send(resource, request).await?;
        expect_success(resource, key, response)
            .await
            .map_err(missing_table)
    }

    /// PATCH or DELETE one keyed row; no row affected is `NotFound`.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        resource: Resource,
        table: &str,
        column: &str,
        value: &str,
        body: Option<&B>,
    ) -> StoreResult<()> {
        let mut request = self
            .keyed(method, table, column, value)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = send(resource, request).await?;
        let rows: Vec<serde_json::Value> = read_json(resource, value, response)
            .await
            .map_err(missing_table)?;

        if rows.is_empty() {
            return Err(StoreError::not_found(resource, value));
        }
        Ok(())
    }

    async fn select_all<T: serde::de::DeserializeOwned>(
        &self,
        resource: Resource,
        table: &str,
        order: &str,
    ) -> StoreResult<Vec<T>> {
        let request = self
            .table(reqwest::Method::GET, table)
            .query(&[("select", "*"), ("order", order)]);
        let response = send(resource, request).await?;
        read_json(resource, "", response).await.map_err(missing_table)
    }
}

/// A 404 from the table API means the table or route is missing.
fn missing_table(err: StoreError) -> StoreError {
    match err {
        StoreError::NotFound { resource, .. } => {
            StoreError::rejected(resource, "table not found")
        }
        other => other,
    }
}

#[async_trait]
impl ProfileStore for RecordStoreClient {
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>> {
        debug!(id, "Fetching profile");
        let row: Option<ProfileRow> = self
            .select(Resource::Profile, &self.profiles_table, "id", id)
            .await?;
        Ok(row.map(Profile::from))
    }

    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()> {
        debug!(id = %profile.id, name = %profile.name, "Inserting profile");
        let row = NewProfileRow {
            id: &profile.id,
            name: &profile.name,
            email: profile.email.as_deref(),
        };
        self.insert(Resource::Profile, &self.profiles_table, &profile.id, &row)
            .await
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<()> {
        debug!(id, ?update, "Updating profile");
        let patch = ProfilePatch {
            name: update.name.as_deref(),
            email: update.email.as_deref(),
            updated_at: Utc::now(),
        };
        self.mutate(
            reqwest::Method::PATCH,
            Resource::Profile,
            &self.profiles_table,
            "id",
            id,
            Some(&patch),
        )
        .await
    }

    async fn delete_profile(&self, id: &str) -> StoreResult<()> {
        debug!(id, "Deleting profile");
        self.mutate::<()>(
            reqwest::Method::DELETE,
            Resource::Profile,
            &self.profiles_table,
            "id",
            id,
            None,
        )
        .await
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        let rows: Vec<ProfileRow> = self
            .select_all(Resource::Profile, &self.profiles_table, "name.asc")
            .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }
}

#[async_trait]
impl RoleStore for RecordStoreClient {
    async fn get_role(&self, user_id: &str) -> StoreResult<Option<RoleAssignment>> {
        debug!(user_id, "Fetching role assignment");
        let row: Option<RoleRow> = self
            .select(Resource::Role, &self.roles_table, "user_id", user_id)
            .await?;
        row.map(RoleAssignment::try_from).transpose()
    }

    async fn insert_role(&self, assignment: &RoleAssignment) -> StoreResult<()> {
        debug!(user_id = %assignment.user_id, role = %assignment.role, "Inserting role assignment");
        let row = RoleRow {
            user_id: assignment.user_id.clone(),
            role: assignment.role.as_str().to_string(),
        };
        self.insert(Resource::Role, &self.roles_table, &assignment.user_id, &row)
            .await
    }

    async fn update_role(&self, user_id: &str, role: Role) -> StoreResult<()> {
        debug!(user_id, %role, "Updating role assignment");
        let patch = RolePatch { role: role.as_str() };
        self.mutate(
            reqwest::Method::PATCH,
            Resource::Role,
            &self.roles_table,
            "user_id",
            user_id,
            Some(&patch),
        )
        .await
    }

    async fn delete_role(&self, user_id: &str) -> StoreResult<()> {
        debug!(user_id, "Deleting role assignment");
        self.mutate::<()>(
            reqwest::Method::DELETE,
            Resource::Role,
            &self.roles_table,
            "user_id",
            user_id,
            None,
        )
        .await
    }

    async fn list_roles(&self) -> StoreResult<Vec<RoleAssignment>> {
        let rows: Vec<RoleRow> = self
            .select_all(Resource::Role, &self.roles_table, "user_id.asc")
            .await?;
        rows.into_iter().map(RoleAssignment::try_from).collect()
    }
}
