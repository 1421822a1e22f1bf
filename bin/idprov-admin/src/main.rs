//! Identity Provisioner Admin
//!
//! Runs one provisioning operation against the configured stores and prints
//! the result as JSON on stdout. Logs go to stderr.
//!
//! ```text
//! idprov-admin create --email ann@x.com --password '...' --name Ann --role admin
//! idprov-admin update --id <uuid> --role agent --self-heal
//! idprov-admin apply request.json
//! echo '{"operation":"List"}' | idprov-admin apply
//! ```
//!
//! Exit codes: 0 on success, 2 for an invalid request, 1 for store failures.
//!
//! With `backend = "memory"` every invocation starts from an empty store, so
//! only a single `apply` or `create` is meaningful; use the http backend for
//! anything that spans invocations.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use idprov_config::ConfigLoader;
use idprov_provisioning::{Operation, ProvisioningRequest, ProvisioningResponse, ProvisioningService};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "idprov-admin")]
#[command(about = "Provision composite identities: credential, profile and role")]
struct Cli {
    /// Configuration file (defaults to IDPROV_CONFIG, then the standard search paths)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON result
    #[arg(long, default_value = "false")]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a credential, profile and role assignment
    Create {
        #[arg(long)]
        email: String,
        #[arg(long, env = "IDPROV_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Update any subset of email, password, name and role
    Update {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        fields: UpdateFields,
    },
    /// Delete profile and role, then the credential
    Delete {
        #[arg(long)]
        id: String,
    },
    /// List all credentials
    List,
    /// Set a new password on an existing credential
    ResetPassword {
        #[arg(long)]
        id: String,
        #[arg(long, env = "IDPROV_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Run a JSON request read from a file, or stdin when omitted or "-"
    Apply { file: Option<PathBuf> },
}

#[derive(Args, Debug)]
struct UpdateFields {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    role: Option<String>,
    /// Recreate a missing profile or role assignment
    #[arg(long, default_value = "false")]
    self_heal: bool,
}

impl Command {
    fn into_request(self) -> Result<ProvisioningRequest> {
        let request = match self {
            Command::Create { email, password, name, role } => ProvisioningRequest {
                email: Some(email),
                password: Some(password),
                name,
                role,
                ..ProvisioningRequest::new(Operation::Create)
            },
            Command::Update { id, fields } => ProvisioningRequest {
                id: Some(id),
                email: fields.email,
                password: fields.password,
                name: fields.name,
                role: fields.role,
                self_heal: fields.self_heal,
                ..ProvisioningRequest::new(Operation::Update)
            },
            Command::Delete { id } => ProvisioningRequest {
                id: Some(id),
                ..ProvisioningRequest::new(Operation::Delete)
            },
            Command::List => ProvisioningRequest::new(Operation::List),
            Command::ResetPassword { id, password } => ProvisioningRequest {
                id: Some(id),
                password: Some(password),
                ..ProvisioningRequest::new(Operation::ResetPassword)
            },
            Command::Apply { file } => read_request(file)?,
        };
        Ok(request)
    }
}

fn read_request(file: Option<PathBuf>) -> Result<ProvisioningRequest> {
    let raw = match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read request file {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    ProvisioningRequest::from_json(&raw).context("Invalid provisioning request")
}

fn exit_code(response: &ProvisioningResponse) -> ExitCode {
    match response.http_status_code() {
        200 => ExitCode::SUCCESS,
        400 => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    idprov_common::logging::init_logging("idprov-admin");

    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("Failed to load configuration")?;
    let service = ProvisioningService::from_config(&config).context("Failed to initialize provisioning")?;

    let request = cli.command.into_request()?;
    let operation = request.operation;
    info!(?operation, "Running provisioning request");

    let response = service.handle(request).await;
    if let Some(err) = response.error() {
        error!(
            ?operation,
            code = err.code(),
            failed = ?err.failed_resources(),
            error = %err,
            "Provisioning request failed"
        );
    }

    let output = if cli.pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", output);

    Ok(exit_code(&response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_maps_to_request() {
        let cli = Cli::parse_from([
            "idprov-admin", "create", "--email", "ann@x.com", "--password", "pw", "--role", "admin",
        ]);
        let request = cli.command.into_request().unwrap();
        assert_eq!(request.operation, Operation::Create);
        assert_eq!(request.email.as_deref(), Some("ann@x.com"));
        assert_eq!(request.role.as_deref(), Some("admin"));
        assert!(request.name.is_none());
    }

    #[test]
    fn test_update_self_heal_flag() {
        let cli = Cli::parse_from(["idprov-admin", "update", "--id", "u-1", "--self-heal"]);
        let request = cli.command.into_request().unwrap();
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.id.as_deref(), Some("u-1"));
        assert!(request.self_heal);
    }

    #[test]
    fn test_apply_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{"operation":"Delete","id":"u-1"}"#).unwrap();

        let request = read_request(Some(path)).unwrap();
        assert_eq!(request.operation, Operation::Delete);
        assert_eq!(request.id.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_apply_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(&path, r#"{"operation":"Purge"}"#).unwrap();

        assert!(read_request(Some(path)).is_err());
    }
}
