//! Provisioning Service
//!
//! Entry point for composite identity operations. Wires the use cases over
//! one [`IdentityStore`] and dispatches inbound requests to them.

use std::sync::Arc;

use idprov_common::{ComposedIdentity, Credential, ParseRoleError, Role};
use idprov_config::{AppConfig, Backend, ConfigError, ReconcileConfig};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::details;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::operations::{
    CreateIdentityCommand, CreateIdentityUseCase, DeleteIdentityCommand, DeleteIdentityUseCase,
    DeletedIdentity, ListIdentitiesUseCase, PasswordReset, ResetPasswordCommand,
    ResetPasswordUseCase, UpdateIdentityCommand, UpdateIdentityUseCase,
};
use crate::poll::PollPolicy;
use crate::reconciler::Reconciler;
use crate::request::{Operation, ProvisioningRequest, ProvisioningResponse};
use crate::store::{HttpStoreError, IdentityStore, MemoryIdentityStore};

/// Error building a service from configuration.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build store client: {0}")]
    Store(#[from] HttpStoreError),

    #[error("Invalid default role: {0}")]
    DefaultRole(#[from] ParseRoleError),
}

/// Behaviour knobs for the service.
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    /// Polling for trigger-created rows after a credential insert
    pub trigger_poll: PollPolicy,
    pub default_role: Role,
    pub confirm_on_create: bool,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            trigger_poll: PollPolicy::default(),
            default_role: Role::default(),
            confirm_on_create: true,
        }
    }
}

impl TryFrom<&ReconcileConfig> for ProvisioningSettings {
    type Error = ParseRoleError;

    fn try_from(config: &ReconcileConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            trigger_poll: PollPolicy::from(config),
            default_role: config.default_role.parse()?,
            confirm_on_create: config.confirm_on_create,
        })
    }
}

/// Composite identity operations over one identity store.
pub struct ProvisioningService {
    create: CreateIdentityUseCase,
    update: UpdateIdentityUseCase,
    delete: DeleteIdentityUseCase,
    list: ListIdentitiesUseCase,
    reset_password: ResetPasswordUseCase,
}

impl ProvisioningService {
    pub fn new(store: IdentityStore, settings: ProvisioningSettings) -> Self {
        let reconciler = Reconciler::new(store.clone()).with_default_role(settings.default_role);

        Self {
            create: CreateIdentityUseCase::new(store.clone(), reconciler.clone(), settings.trigger_poll)
                .with_confirm_on_create(settings.confirm_on_create),
            update: UpdateIdentityUseCase::new(store.clone(), reconciler.clone()),
            delete: DeleteIdentityUseCase::new(reconciler),
            list: ListIdentitiesUseCase::new(store.clone()),
            reset_password: ResetPasswordUseCase::new(store),
        }
    }

    /// Validate `config` and wire the configured backend.
    ///
    /// The memory backend gets a fresh, empty store owned by this service.
    pub fn from_config(config: &AppConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let settings = ProvisioningSettings::try_from(&config.reconcile)?;

        let store = match config.backend {
            Backend::Http => IdentityStore::http(&config.credentials, &config.records)?,
            Backend::Memory => {
                warn!("Memory backend selected, identities are not persisted beyond this process");
                IdentityStore::memory(Arc::new(MemoryIdentityStore::new()))
            }
        };

        info!(
            backend = ?config.backend,
            default_role = %settings.default_role,
            poll_attempts = settings.trigger_poll.attempts,
            poll_budget_ms = settings.trigger_poll.total_wait().as_millis() as u64,
            "Provisioning service initialized"
        );
        Ok(Self::new(store, settings))
    }

    pub async fn create_identity(&self, command: CreateIdentityCommand) -> ProvisioningResult<ComposedIdentity> {
        let span = info_span!("create_identity", email = %command.email);
        self.create.execute(command).instrument(span).await
    }

    pub async fn update_identity(&self, command: UpdateIdentityCommand) -> ProvisioningResult<ComposedIdentity> {
        let span = info_span!("update_identity", id = %command.id, self_heal = command.self_heal);
        self.update.execute(command).instrument(span).await
    }

    pub async fn delete_identity(&self, id: impl Into<String>) -> ProvisioningResult<DeletedIdentity> {
        let command = DeleteIdentityCommand::new(id);
        let span = info_span!("delete_identity", id = %command.id);
        self.delete.execute(command).instrument(span).await
    }

    pub async fn list_identities(&self) -> ProvisioningResult<Vec<Credential>> {
        self.list.execute().instrument(info_span!("list_identities")).await
    }

    pub async fn reset_password(
        &self,
        id: impl Into<String>,
        password: impl Into<String>,
    ) -> ProvisioningResult<PasswordReset> {
        let command = ResetPasswordCommand::new(id, password);
        let span = info_span!("reset_password", id = %command.id);
        self.reset_password.execute(command).instrument(span).await
    }

    /// Validate and dispatch an inbound request.
    pub async fn handle(&self, request: ProvisioningRequest) -> ProvisioningResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(error) => ProvisioningResponse::Failed { error },
        }
    }

    async fn dispatch(&self, request: ProvisioningRequest) -> ProvisioningResult<ProvisioningResponse> {
        let role = parse_role(request.role.as_deref())?;

        match request.operation {
            Operation::Create => {
                let email = required(request.email, "EMAIL_REQUIRED", "Email address is required")?;
                let password = required(request.password, "PASSWORD_REQUIRED", "Password is required")?;
                let identity = self
                    .create_identity(CreateIdentityCommand {
                        email,
                        password,
                        name: request.name,
                        role,
                    })
                    .await?;
                Ok(ProvisioningResponse::Identity { identity })
            }
            Operation::Update => {
                let id = required(request.id, "ID_REQUIRED", "Identity ID is required")?;
                let identity = self
                    .update_identity(UpdateIdentityCommand {
                        id,
                        email: request.email,
                        password: request.password,
                        name: request.name,
                        role,
                        self_heal: request.self_heal,
                    })
                    .await?;
                Ok(ProvisioningResponse::Identity { identity })
            }
            Operation::Delete => {
                let id = required(request.id, "ID_REQUIRED", "Identity ID is required")?;
                let deleted = self.delete_identity(id).await?;
                Ok(ProvisioningResponse::Deleted { id: deleted.id })
            }
            Operation::List => {
                let credentials = self.list_identities().await?;
                Ok(ProvisioningResponse::Credentials { credentials })
            }
            Operation::ResetPassword => {
                let id = required(request.id, "ID_REQUIRED", "Identity ID is required")?;
                let password = required(request.password, "PASSWORD_REQUIRED", "Password is required")?;
                let reset = self.reset_password(id, password).await?;
                Ok(ProvisioningResponse::PasswordReset { id: reset.id })
            }
        }
    }
}

fn required(value: Option<String>, code: &str, message: &str) -> ProvisioningResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProvisioningError::validation(code, message))
}

fn parse_role(raw: Option<&str>) -> ProvisioningResult<Option<Role>> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(name) => name.parse().map(Some).map_err(|_| {
            ProvisioningError::validation_with_details(
                "INVALID_ROLE",
                format!("Unknown role '{}'", name),
                details! { "role" => name, "allowed" => [Role::Agent.as_str(), Role::Admin.as_str()] },
            )
        }),
    }
}
