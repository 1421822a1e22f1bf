//! Identity provisioning
//!
//! An identity is three records in three independent stores: a credential in
//! the auth provider, a profile row and a role assignment row. There is no
//! transaction across them, so every operation is built from idempotent,
//! read-before-write steps that can be re-run after a partial failure.
//!
//! - [`store`]: capability traits plus in-memory and HTTP adapters
//! - [`reconciler`]: ensure-present and ordered delete
//! - [`operations`]: create, update, delete, list and reset-password use cases
//! - [`service`]: the [`ProvisioningService`] facade and request dispatch

pub mod error;
pub mod operations;
pub mod poll;
pub mod reconciler;
pub mod request;
pub mod service;
pub mod store;

pub use error::{ProvisioningError, ProvisioningResult, StoreError, StoreResult};
pub use operations::{
    CreateIdentityCommand, DeleteIdentityCommand, DeletedIdentity, PasswordReset,
    ResetPasswordCommand, UpdateIdentityCommand,
};
pub use poll::PollPolicy;
pub use reconciler::{DeleteReport, DesiredState, ReconcileReport, Reconciler};
pub use request::{Operation, ProvisioningRequest, ProvisioningResponse};
pub use service::{ProvisioningService, ProvisioningSettings, SetupError};
pub use store::{
    AuthAdminClient, CredentialStore, IdentityStore, MemoryIdentityStore, ProfileStore,
    RecordStoreClient, RoleStore, SignupTrigger, StoreOp,
};
