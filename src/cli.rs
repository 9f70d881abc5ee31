use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentfleet")]
#[command(about = "Fleet management control plane for macOS cleanup agents")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a config file (TOML `key = value` or JSON)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Start the combined agent-facing and operator-facing HTTP API
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },

    /// Inspect the in-memory agent registry
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Manage policy documents in the policy store
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Push a policy out to agents and track rollout
    Distribute {
        #[command(subcommand)]
        action: DistributeAction,
    },

    /// Compliance and audit reporting
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Issue and verify operator access tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
pub enum RegistryAction {
    /// Print aggregate fleet statistics
    Stats,
    /// List every registered agent
    List,
}

#[derive(Subcommand)]
pub enum PolicyAction {
    /// Validate a policy document without saving it
    Validate {
        /// Path to a JSON policy file
        file: String,
    },
    /// List every policy in the store
    List,
    /// Print one policy as YAML
    Show {
        name: String,
    },
    /// Save a policy document (JSON) into the store
    Import {
        file: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Print a stored policy as a portable JSON document
    Export {
        name: String,
    },
    /// Merge several policies' rules into one new policy
    Merge {
        names: Vec<String>,
        #[arg(long = "as")]
        new_name: String,
    },
    /// List built-in policy templates
    BundleList,
    /// Show one built-in policy template as YAML
    BundleShow {
        name: String,
    },
    /// Save a built-in policy template into the store under a new name
    BundleApply {
        name: String,
        #[arg(long = "as")]
        policy_name: String,
    },
}

#[derive(Subcommand)]
pub enum DistributeAction {
    /// Start a new distribution of a stored policy
    Start {
        policy: String,
        #[arg(long)]
        tags: Vec<String>,
        #[arg(long)]
        agents: Vec<String>,
    },
    /// Print the current status of a distribution
    Status {
        id: String,
    },
    /// Cancel an in-progress distribution
    Cancel {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ReportAction {
    /// Fleet-wide compliance overview
    Fleet,
    /// Compliance score for one agent
    Agent {
        id: String,
    },
    /// Per-agent outcome for one distribution
    PolicyExecution {
        id: String,
    },
    /// Audit log summary over a window
    AuditSummary,
}

#[derive(Subcommand)]
pub enum TokenAction {
    /// Issue an access/refresh token pair for an operator
    Issue {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        role: RoleArg,
    },
    /// Verify a token and print its claims
    Verify {
        token: String,
    },
    /// Flag a user inactive, denying any token already issued to them
    Deactivate {
        user_id: String,
    },
}

#[derive(Copy, Clone, clap::ValueEnum)]
pub enum RoleArg {
    Viewer,
    Operator,
    Admin,
}

impl From<RoleArg> for agentfleet::model::Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Viewer => agentfleet::model::Role::Viewer,
            RoleArg::Operator => agentfleet::model::Role::Operator,
            RoleArg::Admin => agentfleet::model::Role::Admin,
        }
    }
}
