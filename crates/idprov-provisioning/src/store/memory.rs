//! In-memory identity store
//!
//! Implements all three store traits over `parking_lot` locks, enforcing the
//! same uniqueness constraints as the real stores:
//! - credential email (case-insensitive)
//! - profile `id`
//! - role `user_id`
//!
//! Extras for local runs and tests:
//! - a [`SignupTrigger`] that creates the profile and role on credential
//!   insert, optionally after a delay, the way a database trigger would
//! - failure injection per resource and operation
//! - per-operation call counters

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use idprov_common::{
    Credential, CredentialUpdate, FailureKind, NewCredential, Profile, ProfileUpdate, Resource,
    Role, RoleAssignment,
};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{CredentialStore, ProfileStore, RoleStore};
use crate::error::{StoreError, StoreResult};

/// Store operation, used to target injected failures and read call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Insert,
    Update,
    Delete,
    List,
}

/// Simulated signup trigger fired by credential inserts.
#[derive(Debug, Clone)]
pub struct SignupTrigger {
    /// Zero runs the trigger inside the insert call
    pub delay: Duration,
    pub create_profile: bool,
    pub create_role: bool,
    pub role: Role,
}

impl SignupTrigger {
    /// Create both profile and role after `delay`.
    pub fn after(delay: Duration) -> Self {
        Self {
            delay,
            create_profile: true,
            create_role: true,
            role: Role::default(),
        }
    }

    pub fn immediate() -> Self {
        Self::after(Duration::ZERO)
    }

    pub fn profile_only(mut self) -> Self {
        self.create_role = false;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}

#[derive(Default)]
struct Tables {
    credentials: HashMap<String, StoredCredential>,
    profiles: HashMap<String, Profile>,
    roles: HashMap<String, RoleAssignment>,
}

struct StoredCredential {
    credential: Credential,
    password: String,
}

struct Fault {
    resource: Resource,
    op: StoreOp,
    kind: FailureKind,
    /// `None` fails every call
    remaining: Option<u32>,
}

/// Process-local identity store.
pub struct MemoryIdentityStore {
    tables: Arc<RwLock<Tables>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<(Resource, StoreOp), u32>>,
    trigger: Option<SignupTrigger>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            trigger: None,
        }
    }

    pub fn with_trigger(trigger: SignupTrigger) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::new()
        }
    }

    /// Fail the next call of `op` on `resource` with `kind`.
    pub fn fail_next(&self, resource: Resource, op: StoreOp, kind: FailureKind) {
        self.fail_times(resource, op, kind, 1);
    }

    pub fn fail_times(&self, resource: Resource, op: StoreOp, kind: FailureKind, times: u32) {
        if times == 0 {
            return;
        }
        self.faults.lock().push(Fault {
            resource,
            op,
            kind,
            remaining: Some(times),
        });
    }

    pub fn fail_always(&self, resource: Resource, op: StoreOp, kind: FailureKind) {
        self.faults.lock().push(Fault {
            resource,
            op,
            kind,
            remaining: None,
        });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of calls made for `op` on `resource`, failed ones included.
    pub fn calls(&self, resource: Resource, op: StoreOp) -> u32 {
        self.calls.lock().get(&(resource, op)).copied().unwrap_or(0)
    }

    pub fn credential_count(&self) -> usize {
        self.tables.read().credentials.len()
    }

    pub fn profile_count(&self) -> usize {
        self.tables.read().profiles.len()
    }

    pub fn role_count(&self) -> usize {
        self.tables.read().roles.len()
    }

    pub fn password_matches(&self, id: &str, password: &str) -> bool {
        self.tables
            .read()
            .credentials
            .get(id)
            .map_or(false, |stored| stored.password == password)
    }

    /// Count the call, then fail it if a matching fault is armed.
    fn check(&self, resource: Resource, op: StoreOp, key: &str) -> StoreResult<()> {
        *self.calls.lock().entry((resource, op)).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        let Some(index) = faults
            .iter()
            .position(|f| f.resource == resource && f.op == op)
        else {
            return Ok(());
        };

        let kind = faults[index].kind;
        let exhausted = match faults[index].remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            faults.remove(index);
        }

        debug!(%resource, ?op, key, ?kind, "Injected store failure");
        Err(match kind {
            FailureKind::Rejected => StoreError::rejected(resource, "injected failure"),
            FailureKind::Unavailable => StoreError::unavailable(resource, "injected failure"),
            FailureKind::NotFound => StoreError::not_found(resource, key),
        })
    }

    fn fire_trigger(&self, credential: &Credential) {
        let Some(trigger) = self.trigger.clone() else {
            return;
        };
        let tables = Arc::clone(&self.tables);
        let id = credential.id.clone();
        let email = credential.email.clone();

        if trigger.delay.is_zero() {
            run_trigger(&tables, &trigger, &id, &email);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(trigger.delay).await;
                run_trigger(&tables, &trigger, &id, &email);
            });
        }
    }
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn run_trigger(tables: &RwLock<Tables>, trigger: &SignupTrigger, id: &str, email: &str) {
    let mut tables = tables.write();
    if trigger.create_profile {
        tables
            .profiles
            .entry(id.to_string())
            .or_insert_with(|| Profile::new(id, Profile::default_name_for(email), email));
    }
    if trigger.create_role {
        tables
            .roles
            .entry(id.to_string())
            .or_insert_with(|| RoleAssignment::new(id, trigger.role));
    }
    debug!(id, "Signup trigger ran");
}

fn email_taken(tables: &Tables, email: &str, except_id: Option<&str>) -> bool {
    tables.credentials.values().any(|stored| {
        stored.credential.email.eq_ignore_ascii_case(email)
            && Some(stored.credential.id.as_str()) != except_id
    })
}

#[async_trait]
impl CredentialStore for MemoryIdentityStore {
    async fn get_credential(&self, id: &str) -> StoreResult<Option<Credential>> {
        self.check(Resource::Credential, StoreOp::Get, id)?;
        Ok(self
            .tables
            .read()
            .credentials
            .get(id)
            .map(|stored| stored.credential.clone()))
    }

    async fn insert_credential(&self, new: &NewCredential) -> StoreResult<Credential> {
        self.check(Resource::Credential, StoreOp::Insert, &new.email)?;

        if new.email.trim().is_empty() {
            return Err(StoreError::rejected(Resource::Credential, "email is required"));
        }
        if new.password.is_empty() {
            return Err(StoreError::rejected(Resource::Credential, "password is required"));
        }

        let credential = {
            let mut tables = self.tables.write();
            if email_taken(&tables, &new.email, None) {
                return Err(StoreError::already_exists(Resource::Credential, &new.email));
            }

            let credential = Credential {
                id: uuid::Uuid::new_v4().to_string(),
                email: new.email.clone(),
                confirmed: new.confirmed,
                created_at: Some(Utc::now()),
            };
            tables.credentials.insert(
                credential.id.clone(),
                StoredCredential {
                    credential: credential.clone(),
                    password: new.password.clone(),
                },
            );
            credential
        };

        self.fire_trigger(&credential);
        Ok(credential)
    }

    async fn update_credential(&self, id: &str, update: &CredentialUpdate) -> StoreResult<()> {
        self.check(Resource::Credential, StoreOp::Update, id)?;

        let mut tables = self.tables.write();
        if let Some(ref email) = update.email {
            if email_taken(&tables, email, Some(id)) {
                return Err(StoreError::rejected(
                    Resource::Credential,
                    format!("email {} is already in use", email),
                ));
            }
        }

        let stored = tables
            .credentials
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(Resource::Credential, id))?;
        if let Some(ref email) = update.email {
            stored.credential.email = email.clone();
        }
        if let Some(ref password) = update.password {
            stored.password = password.clone();
        }
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> StoreResult<()> {
        self.check(Resource::Credential, StoreOp::Delete, id)?;
        self.tables
            .write()
            .credentials
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(Resource::Credential, id))
    }

    async fn list_credentials(&self) -> StoreResult<Vec<Credential>> {
        self.check(Resource::Credential, StoreOp::List, "")?;
        let mut credentials: Vec<Credential> = self
            .tables
            .read()
            .credentials
            .values()
            .map(|stored| stored.credential.clone())
            .collect();
        credentials.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(credentials)
    }
}

#[async_trait]
impl ProfileStore for MemoryIdentityStore {
    async fn get_profile(&self, id: &str) -> StoreResult<Option<Profile>> {
        self.check(Resource::Profile, StoreOp::Get, id)?;
        Ok(self.tables.read().profiles.get(id).cloned())
    }

    async fn insert_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.check(Resource::Profile, StoreOp::Insert, &profile.id)?;
        if profile.id.is_empty() {
            return Err(StoreError::rejected(Resource::Profile, "id is required"));
        }

        let mut tables = self.tables.write();
        if tables.profiles.contains_key(&profile.id) {
            return Err(StoreError::already_exists(Resource::Profile, &profile.id));
        }
        tables.profiles.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> StoreResult<()> {
        self.check(Resource::Profile, StoreOp::Update, id)?;
        let mut tables = self.tables.write();
        let profile = tables
            .profiles
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(Resource::Profile, id))?;
        update.apply_to(profile);
        Ok(())
    }

    async fn delete_profile(&self, id: &str) -> StoreResult<()> {
        self.check(Resource::Profile, StoreOp::Delete, id)?;
        self.tables
            .write()
            .profiles
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(Resource::Profile, id))
    }

    async fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        self.check(Resource::Profile, StoreOp::List, "")?;
        let mut profiles: Vec<Profile> = self.tables.read().profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }
}

#[async_trait]
impl RoleStore for MemoryIdentityStore {
    async fn get_role(&self, user_id: &str) -> StoreResult<Option<RoleAssignment>> {
        self.check(Resource::Role, StoreOp::Get, user_id)?;
        Ok(self.tables.read().roles.get(user_id).cloned())
    }

    async fn insert_role(&self, assignment: &RoleAssignment) -> StoreResult<()> {
        self.check(Resource::Role, StoreOp::Insert, &assignment.user_id)?;
        if assignment.user_id.is_empty() {
            return Err(StoreError::rejected(Resource::Role, "user_id is required"));
        }

        let mut tables = self.tables.write();
        if tables.roles.contains_key(&assignment.user_id) {
            return Err(StoreError::already_exists(Resource::Role, &assignment.user_id));
        }
        tables
            .roles
            .insert(assignment.user_id.clone(), assignment.clone());
        Ok(())
    }

    async fn update_role(&self, user_id: &str, role: Role) -> StoreResult<()> {
        self.check(Resource::Role, StoreOp::Update, user_id)?;
        let mut tables = self.tables.write();
        let assignment = tables
            .roles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found(Resource::Role, user_id))?;
        assignment.role = role;
        Ok(())
    }

    async fn delete_role(&self, user_id: &str) -> StoreResult<()> {
        self.check(Resource::Role, StoreOp::Delete, user_id)?;
        self.tables
            .write()
            .roles
            .remove(user_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(Resource::Role, user_id))
    }

    async fn list_roles(&self) -> StoreResult<Vec<RoleAssignment>> {
        self.check(Resource::Role, StoreOp::List, "")?;
        let mut roles: Vec<RoleAssignment> = self.tables.read().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_credential_email_is_unique() {
        let store = MemoryIdentityStore::new();
        store
            .insert_credential(&NewCredential::new("ann@x.com", "pw"))
            .await
            .unwrap();

        let err = store
            .insert_credential(&NewCredential::new("ANN@x.com", "pw"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(err.resource(), Resource::Credential);
        assert_eq!(store.credential_count(), 1);
    }

    #[tokio::test]
    async fn test_profile_and_role_keys_are_unique() {
        let store = MemoryIdentityStore::new();
        let profile = Profile::new("u-1", "Ann", "ann@x.com");
        store.insert_profile(&profile).await.unwrap();
        assert!(store.insert_profile(&profile).await.unwrap_err().is_already_exists());

        let role = RoleAssignment::new("u-1", Role::Agent);
        store.insert_role(&role).await.unwrap();
        let err = store
            .insert_role(&RoleAssignment::new("u-1", Role::Admin))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.role_count(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_absent_but_update_is_not_found() {
        let store = MemoryIdentityStore::new();
        assert!(store.get_profile("nope").await.unwrap().is_none());
        assert!(store.get_role("nope").await.unwrap().is_none());

        let err = store.update_role("nope", Role::Admin).await.unwrap_err();
        assert!(err.is_not_found());
        let err = store.delete_credential("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_credential_email_conflict_is_rejected() {
        let store = MemoryIdentityStore::new();
        store
            .insert_credential(&NewCredential::new("ann@x.com", "pw"))
            .await
            .unwrap();
        let bob = store
            .insert_credential(&NewCredential::new("bob@x.com", "pw"))
            .await
            .unwrap();

        let update = CredentialUpdate {
            email: Some("ann@x.com".to_string()),
            password: None,
        };
        let err = store.update_credential(&bob.id, &update).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_fail_next_fires_once_and_counts_calls() {
        let store = MemoryIdentityStore::new();
        store.fail_next(Resource::Profile, StoreOp::Get, FailureKind::Unavailable);

        let err = store.get_profile("u-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.get_profile("u-1").await.unwrap().is_none());
        assert_eq!(store.calls(Resource::Profile, StoreOp::Get), 2);
        assert_eq!(store.calls(Resource::Role, StoreOp::Get), 0);
    }

    #[tokio::test]
    async fn test_immediate_trigger_creates_profile_and_role() {
        let store = MemoryIdentityStore::with_trigger(SignupTrigger::immediate());
        let credential = store
            .insert_credential(&NewCredential::new("ann@x.com", "pw"))
            .await
            .unwrap();

        let profile = store.get_profile(&credential.id).await.unwrap().unwrap();
        assert_eq!(profile.name, "ann");
        assert_eq!(profile.email.as_deref(), Some("ann@x.com"));
        let role = store.get_role(&credential.id).await.unwrap().unwrap();
        assert_eq!(role.role, Role::Agent);
    }

    #[tokio::test]
    async fn test_delayed_trigger_runs_later() {
        let store = MemoryIdentityStore::with_trigger(
            SignupTrigger::after(Duration::from_millis(50)).profile_only(),
        );
        let credential = store
            .insert_credential(&NewCredential::new("ann@x.com", "pw"))
            .await
            .unwrap();
        assert_eq!(store.profile_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get_profile(&credential.id).await.unwrap().is_some());
        assert_eq!(store.role_count(), 0);
    }
}
