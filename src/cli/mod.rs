//! CLI module for stratum
//!
//! Thin kubectl-like surface over the reconciliation core:
//! - `stratum context` - Manage platform contexts
//! - `stratum resolve` - Find the object a logical name refers to
//! - `stratum apply` - Reconcile a plan of resource descriptors
//! - `stratum wait` - Wait for an object to reach a state
//! - `stratum delete` - Delete an object if it exists
//! - `stratum back-id` - Resolve a Rancher cluster's management id
//! - `stratum register-token` - Ensure a cluster registration token

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::platform::{PlatformFamily, ResourceKind};

#[derive(Parser, Debug)]
#[command(name = "stratum")]
#[command(about = "Idempotent reconciliation of cloud resources")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.stratum/config)
    #[arg(long, global = true, env = "STRATUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file with tokens and passwords
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Context to use instead of the current one
    #[arg(long, global = true)]
    pub context: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage platform contexts
    Context(ContextArgs),

    /// Resolve a logical name to a remote object
    Resolve(ResolveArgs),

    /// Reconcile every step of a plan file, in order
    Apply(ApplyArgs),

    /// Wait for an object to reach a state
    Wait(WaitArgs),

    /// Delete an object if it exists
    Delete(DeleteArgs),

    /// Resolve the management id of a provisioning cluster
    #[command(name = "back-id")]
    BackId(BackIdArgs),

    /// Ensure a registration token exists for a cluster
    #[command(name = "register-token")]
    RegisterToken(RegisterTokenArgs),
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List all contexts
    List,

    /// Show current context
    Current,

    /// Switch to a context
    Use {
        /// Context name
        name: String,
    },

    /// Add a new context
    Add {
        /// Context name
        name: String,

        /// API base URL
        #[arg(long)]
        url: String,

        /// Platform family: openstack, kubernetes or rancher
        #[arg(long)]
        platform: PlatformFamily,

        /// Token, may reference the environment (e.g. '$RANCHER_TOKEN')
        #[arg(long)]
        token: Option<String>,

        /// Default namespace for namespaced kinds
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Delete a context
    Delete {
        /// Context name
        name: String,
    },
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Resource kind (network, subnet, sg, fip, secret, ...)
    pub kind: ResourceKind,

    /// Logical name
    pub name: String,

    #[arg(short, long)]
    pub namespace: Option<String>,
}

/// Arguments for the apply command
#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Plan file: a YAML or JSON list of resource descriptors
    #[arg(short = 'f', long = "file")]
    pub file: PathBuf,

    /// Run against an empty in-memory platform instead of the real one
    #[arg(long)]
    pub dry_run: bool,

    /// Do not enforce network tier order between steps
    #[arg(long)]
    pub unordered: bool,
}

/// Arguments for the wait command
#[derive(Parser, Debug)]
pub struct WaitArgs {
    pub kind: ResourceKind,

    pub name: String,

    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Wait until the status equals this value
    #[arg(long, group = "until")]
    pub status: Option<String>,

    /// Wait until POINTER=VALUE holds (e.g. /status/ready=true)
    #[arg(long, group = "until", value_name = "POINTER=VALUE")]
    pub field: Option<String>,

    /// Wait until the field at POINTER is populated
    #[arg(long, group = "until", value_name = "POINTER")]
    pub present: Option<String>,

    /// Wait until the object is gone
    #[arg(long, group = "until")]
    pub absent: bool,

    /// Timeout in seconds (default from config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Poll interval in seconds (default from config)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Statuses that abort the wait
    #[arg(long = "fail-on")]
    pub fail_on: Vec<String>,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    pub kind: ResourceKind,

    pub name: String,

    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Return only once the object is gone
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for the back-id command
#[derive(Parser, Debug)]
pub struct BackIdArgs {
    /// Provisioning cluster name
    pub front: String,

    /// Namespace of the provisioning cluster
    #[arg(short, long, default_value = "fleet-default")]
    pub namespace: String,
}

/// Arguments for the register-token command
#[derive(Parser, Debug)]
pub struct RegisterTokenArgs {
    /// Provisioning cluster name
    #[arg(long, conflicts_with = "back", required_unless_present = "back")]
    pub front: Option<String>,

    /// Management cluster id
    #[arg(long)]
    pub back: Option<String>,

    /// Namespace of the provisioning cluster
    #[arg(short, long, default_value = "fleet-default")]
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_context_use() {
        let cli = Cli::parse_from(["stratum", "context", "use", "lab"]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::Use { name } => assert_eq!(name, "lab"),
                _ => panic!("Expected Use action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_parse_context_add() {
        let cli = Cli::parse_from([
            "stratum",
            "context",
            "add",
            "rke",
            "--url",
            "https://rancher.lab",
            "--platform",
            "rancher",
            "--token",
            "$RANCHER_TOKEN",
        ]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::Add {
                    name,
                    platform,
                    token,
                    ..
                } => {
                    assert_eq!(name, "rke");
                    assert_eq!(platform, PlatformFamily::Rancher);
                    assert_eq!(token.as_deref(), Some("$RANCHER_TOKEN"));
                }
                _ => panic!("Expected Add action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_parse_resolve_with_alias() {
        let cli = Cli::parse_from(["stratum", "resolve", "fip", "lb-vip"]);
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.kind, ResourceKind::FloatingIp);
                assert_eq!(args.name, "lb-vip");
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::parse_from(["stratum", "apply", "-f", "plan.yaml", "--dry-run"]);
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.file, PathBuf::from("plan.yaml"));
                assert!(args.dry_run);
                assert!(!args.unordered);
            }
            _ => panic!("Expected Apply command"),
        }
    }

    #[test]
    fn test_wait_conditions_are_exclusive() {
        let result = Cli::try_parse_from([
            "stratum", "wait", "server", "vm", "--status", "ACTIVE", "--absent",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_register_token_needs_a_cluster() {
        assert!(Cli::try_parse_from(["stratum", "register-token"]).is_err());
        assert!(Cli::try_parse_from(["stratum", "register-token", "--back", "c-m-1"]).is_ok());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["stratum", "-vvv", "--context", "lab", "back-id", "prod"]);
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.context.as_deref(), Some("lab"));
    }
}
