mod cli;
mod commands;

use agentfleet::config::FleetConfig;
use clap::Parser;
use cli::{Cli, Commands, DistributeAction, PolicyAction, RegistryAction, ReportAction, TokenAction};
use commands::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        return commands::version::run();
    }

    let config = match &cli.config {
        Some(path) => FleetConfig::load(path).await?,
        None => FleetConfig::default(),
    };
    let ctx = Context::build(&config).await?;

    match cli.command {
        Commands::Version => unreachable!("handled above"),
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.bind_addr.clone());
            agentfleet::api::serve(ctx.state, &addr).await?;
        }
        Commands::Registry { action } => match action {
            RegistryAction::Stats => commands::registry::stats(&ctx).await?,
            RegistryAction::List => commands::registry::list(&ctx).await?,
        },
        Commands::Policy { action } => match action {
            PolicyAction::Validate { file } => commands::policy::validate(&file).await?,
            PolicyAction::List => commands::policy::list(&ctx).await?,
            PolicyAction::Show { name } => commands::policy::show(&ctx, &name).await?,
            PolicyAction::Import { file, overwrite } => commands::policy::import(&ctx, &file, overwrite).await?,
            PolicyAction::Export { name } => commands::policy::export(&ctx, &name).await?,
            PolicyAction::Merge { names, new_name } => commands::policy::merge(&ctx, &names, &new_name).await?,
            PolicyAction::BundleList => commands::policy::bundle_list()?,
            PolicyAction::BundleShow { name } => commands::policy::bundle_show(&name)?,
            PolicyAction::BundleApply { name, policy_name } => {
                commands::policy::bundle_apply(&ctx, &name, &policy_name).await?
            }
        },
        Commands::Distribute { action } => match action {
            DistributeAction::Start { policy, tags, agents } => {
                commands::distribute::start(&ctx, &policy, &tags, &agents).await?
            }
            DistributeAction::Status { id } => commands::distribute::status(&ctx, &id).await?,
            DistributeAction::Cancel { id } => commands::distribute::cancel(&ctx, &id).await?,
        },
        Commands::Report { action } => match action {
            ReportAction::Fleet => commands::report::fleet(&ctx).await?,
            ReportAction::Agent { id } => commands::report::agent(&ctx, &id).await?,
            ReportAction::PolicyExecution { id } => commands::report::policy_execution(&ctx, &id).await?,
            ReportAction::AuditSummary => commands::report::audit_summary(&ctx).await?,
        },
        Commands::Token { action } => match action {
            TokenAction::Issue { user, role } => commands::token::issue(&ctx, &user, role).await?,
            TokenAction::Verify { token } => commands::token::verify(&ctx, &token).await?,
            TokenAction::Deactivate { user_id } => commands::token::deactivate(&ctx, &user_id).await?,
        },
    }

    Ok(())
}
