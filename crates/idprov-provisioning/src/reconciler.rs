//! Reconciler
//!
//! Drives the profile and role rows of one identifier toward a desired state
//! with read-before-write checks. Every step is safe to repeat: a second run
//! over a converged identity performs no writes.
//!
//! Uniqueness on `profiles.id` and `user_roles.user_id` is the only guard
//! against concurrent writers, so `AlreadyExists` from those inserts means
//! someone else got there first and the row is adopted instead.

use idprov_common::{
    ComposedIdentity, Credential, FailureKind, Profile, ProfileUpdate, Resource, ResourceFailure,
    Role, RoleAssignment,
};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::poll::{self, PollPolicy};
use crate::store::IdentityStore;

/// Target attributes for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub id: String,
    /// Written to the profile's denormalized email
    pub email: String,
    /// `None` keeps an existing name, or uses the email local part on insert
    pub name: Option<String>,
    /// `None` keeps an existing role, or uses the default role on insert
    pub role: Option<Role>,
}

impl DesiredState {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: None,
            role: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Fields of `profile` that differ from the desired state.
    fn profile_drift(&self, profile: &Profile) -> ProfileUpdate {
        ProfileUpdate {
            name: self.name.clone().filter(|name| *name != profile.name),
            email: Some(self.email.clone()).filter(|email| {
                !profile
                    .email
                    .as_deref()
                    .map_or(false, |current| current.eq_ignore_ascii_case(email))
            }),
        }
    }
}

/// Outcome of ensure-present.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub profile: Option<Profile>,
    pub role: Option<RoleAssignment>,
    /// Failures in step order: profile first, then role
    pub failures: Vec<ResourceFailure>,
    /// Inserts and updates applied by this run
    pub writes: u32,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.profile.is_some() && self.role.is_some()
    }

    /// Join with the credential, or return the failures.
    ///
    /// A joined identity whose rows disagree with the credential is a failure
    /// of the disagreeing row.
    pub fn compose(self, credential: Credential) -> Result<ComposedIdentity, Vec<ResourceFailure>> {
        let mut failures = self.failures;
        if !failures.is_empty() {
            return Err(failures);
        }

        match (self.profile, self.role) {
            (Some(profile), Some(role)) => {
                let identity = ComposedIdentity {
                    credential,
                    profile,
                    role,
                };
                if identity.is_consistent() {
                    return Ok(identity);
                }
                failures.push(mismatch(&identity));
            }
            (profile, role) => {
                if profile.is_none() {
                    failures.push(ResourceFailure::new(
                        Resource::Profile,
                        FailureKind::NotFound,
                        "profile not reconciled",
                    ));
                }
                if role.is_none() {
                    failures.push(ResourceFailure::new(
                        Resource::Role,
                        FailureKind::NotFound,
                        "role assignment not reconciled",
                    ));
                }
            }
        }
        Err(failures)
    }
}

fn mismatch(identity: &ComposedIdentity) -> ResourceFailure {
    let resource = if identity.role.user_id != identity.credential.id {
        Resource::Role
    } else {
        Resource::Profile
    };
    ResourceFailure::new(
        resource,
        FailureKind::Rejected,
        format!("{} does not match credential {}", resource, identity.id()),
    )
}

/// Outcome of a delete.
#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    pub failures: Vec<ResourceFailure>,
    /// Whether the credential step ran
    pub credential_attempted: bool,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.credential_attempted && self.failures.is_empty()
    }

    /// A dependent failed, so the credential was left in place.
    pub fn is_blocked(&self) -> bool {
        !self.credential_attempted
    }
}

/// Applies desired state to the profile and role stores.
#[derive(Clone)]
pub struct Reconciler {
    store: IdentityStore,
    default_role: Role,
}

impl Reconciler {
    pub fn new(store: IdentityStore) -> Self {
        Self {
            store,
            default_role: Role::default(),
        }
    }

    pub fn with_default_role(mut self, role: Role) -> Self {
        self.default_role = role;
        self
    }

    pub fn default_role(&self) -> Role {
        self.default_role
    }

    /// Create-if-missing and converge both profile and role.
    ///
    /// Both steps always run; failures are collected, not short-circuited.
    pub async fn ensure_present(&self, desired: &DesiredState, policy: &PollPolicy) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        match self.ensure_profile(desired, policy, &mut report.writes).await {
            Ok(profile) => report.profile = Some(profile),
            Err(e) => {
                warn!(id = %desired.id, error = %e, "Profile reconciliation failed");
                report.failures.push(e.into_failure());
            }
        }

        match self
            .ensure_role(&desired.id, desired.role, policy, &mut report.writes)
            .await
        {
            Ok(role) => report.role = Some(role),
            Err(e) => {
                warn!(id = %desired.id, error = %e, "Role reconciliation failed");
                report.failures.push(e.into_failure());
            }
        }

        debug!(
            id = %desired.id,
            writes = report.writes,
            failures = report.failures.len(),
            "Ensure-present finished"
        );
        report
    }

    /// Set the role of `user_id`, inserting the assignment if it is missing.
    pub async fn apply_role(&self, user_id: &str, role: Role) -> StoreResult<RoleAssignment> {
        let mut writes = 0;
        self.ensure_role(user_id, Some(role), &PollPolicy::none(), &mut writes)
            .await
    }

    /// Delete dependents first, credential last.
    ///
    /// `NotFound` counts as already deleted. The credential is only deleted
    /// once profile and role are both gone.
    pub async fn delete(&self, id: &str) -> DeleteReport {
        let mut report = DeleteReport::default();

        if let Err(e) = satisfied_if_missing(self.store.profiles.delete_profile(id).await) {
            warn!(id, error = %e, "Profile delete failed");
            report.failures.push(e.into_failure());
        }
        if let Err(e) = satisfied_if_missing(self.store.roles.delete_role(id).await) {
            warn!(id, error = %e, "Role delete failed");
            report.failures.push(e.into_failure());
        }

        if !report.failures.is_empty() {
            warn!(
                id,
                blocked_by = ?report.failures.iter().map(|f| f.resource).collect::<Vec<_>>(),
                "Credential delete skipped"
            );
            return report;
        }

        report.credential_attempted = true;
        if let Err(e) = satisfied_if_missing(self.store.credentials.delete_credential(id).await) {
            warn!(id, error = %e, "Credential delete failed");
            report.failures.push(e.into_failure());
        }

        report
    }

    async fn ensure_profile(
        &self,
        desired: &DesiredState,
        policy: &PollPolicy,
        writes: &mut u32,
    ) -> StoreResult<Profile> {
        let profiles = self.store.profiles.as_ref();
        let id = desired.id.as_str();

        if let Some(existing) = poll::until_present(policy, move || profiles.get_profile(id)).await? {
            return self.converge_profile(existing, desired, writes).await;
        }

        let name = desired
            .name
            .clone()
            .unwrap_or_else(|| Profile::default_name_for(&desired.email));
        let profile = Profile::new(id, name, desired.email.as_str());

        match profiles.insert_profile(&profile).await {
            Ok(()) => {
                *writes += 1;
                info!(id, name = %profile.name, "Profile inserted");
                Ok(profile)
            }
            Err(e) if e.is_already_exists() => {
                debug!(id, "Profile created concurrently, adopting it");
                match profiles.get_profile(id).await? {
                    Some(existing) => self.converge_profile(existing, desired, writes).await,
                    None => Err(StoreError::unavailable(
                        Resource::Profile,
                        format!("profile {} reported as existing but not readable", id),
                    )),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn converge_profile(
        &self,
        mut profile: Profile,
        desired: &DesiredState,
        writes: &mut u32,
    ) -> StoreResult<Profile> {
        let drift = desired.profile_drift(&profile);
        if drift.is_empty() {
            return Ok(profile);
        }

        self.store.profiles.update_profile(&profile.id, &drift).await?;
        *writes += 1;
        debug!(id = %profile.id, ?drift, "Profile updated in place");
        drift.apply_to(&mut profile);
        Ok(profile)
    }

    async fn ensure_role(
        &self,
        user_id: &str,
        desired: Option<Role>,
        policy: &PollPolicy,
        writes: &mut u32,
    ) -> StoreResult<RoleAssignment> {
        let roles = self.store.roles.as_ref();

        if let Some(existing) = poll::until_present(policy, move || roles.get_role(user_id)).await? {
            return self.converge_role(existing, desired, writes).await;
        }

        let assignment = RoleAssignment::new(user_id, desired.unwrap_or(self.default_role));
        match roles.insert_role(&assignment).await {
            Ok(()) => {
                *writes += 1;
                info!(user_id, role = %assignment.role, "Role assignment inserted");
                Ok(assignment)
            }
            Err(e) if e.is_already_exists() => {
                debug!(user_id, "Role assignment created concurrently, adopting it");
                match roles.get_role(user_id).await? {
                    Some(existing) => self.converge_role(existing, desired, writes).await,
                    None => Err(StoreError::unavailable(
                        Resource::Role,
                        format!("role assignment for {} reported as existing but not readable", user_id),
                    )),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn converge_role(
        &self,
        existing: RoleAssignment,
        desired: Option<Role>,
        writes: &mut u32,
    ) -> StoreResult<RoleAssignment> {
        match desired {
            Some(role) if role != existing.role => {
                self.store.roles.update_role(&existing.user_id, role).await?;
                *writes += 1;
                debug!(user_id = %existing.user_id, from = %existing.role, to = %role, "Role updated in place");
                Ok(RoleAssignment::new(existing.user_id, role))
            }
            _ => Ok(existing),
        }
    }
}

fn satisfied_if_missing(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_drift() {
        let profile = Profile::new("u-1", "ann", "ann@x.com");

        let same = DesiredState::new("u-1", "ANN@x.com");
        assert!(same.profile_drift(&profile).is_empty());

        let renamed = DesiredState::new("u-1", "ann@x.com").with_name("Ann");
        assert_eq!(
            renamed.profile_drift(&profile),
            ProfileUpdate {
                name: Some("Ann".to_string()),
                email: None
            }
        );

        let moved = DesiredState::new("u-1", "ann@y.com");
        assert_eq!(moved.profile_drift(&profile).email.as_deref(), Some("ann@y.com"));
    }

    #[test]
    fn test_compose_requires_both_rows() {
        let credential = Credential {
            id: "u-1".to_string(),
            email: "ann@x.com".to_string(),
            confirmed: true,
            created_at: None,
        };
        let report = ReconcileReport {
            profile: Some(Profile::new("u-1", "Ann", "ann@x.com")),
            role: None,
            failures: vec![],
            writes: 1,
        };
        assert!(!report.is_complete());
        let failures = report.compose(credential).unwrap_err();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].resource, Resource::Role);
    }

    #[test]
    fn test_compose_rejects_mismatched_profile() {
        let credential = Credential {
            id: "u-1".to_string(),
            email: "ann@x.com".to_string(),
            confirmed: true,
            created_at: None,
        };
        let report = ReconcileReport {
            profile: Some(Profile::new("u-1", "Ann", "bob@x.com")),
            role: Some(RoleAssignment::new("u-1", Role::Agent)),
            failures: vec![],
            writes: 0,
        };

        let failures = report.compose(credential).unwrap_err();
        assert_eq!(failures[0].resource, Resource::Profile);
        assert_eq!(failures[0].kind, FailureKind::Rejected);
    }

    #[test]
    fn test_delete_report_states() {
        let blocked = DeleteReport::default();
        assert!(blocked.is_blocked());
        assert!(!blocked.is_complete());

        let done = DeleteReport {
            failures: vec![],
            credential_attempted: true,
        };
        assert!(done.is_complete());
    }
}
