use crate::commands::Context;
use agentfleet::model::DistributionTarget;
use std::collections::BTreeSet;

pub async fn start(ctx: &Context, policy: &str, tags: &[String], agents: &[String]) -> anyhow::Result<()> {
    let target = if !agents.is_empty() {
        DistributionTarget::Agents(agents.iter().cloned().collect())
    } else if !tags.is_empty() {
        DistributionTarget::Tags(tags.iter().cloned().collect::<BTreeSet<_>>())
    } else {
        DistributionTarget::All
    };

    let id = ctx.state.distributor.distribute(policy, target).await?;
    println!("Started distribution '{id}' for policy '{policy}'");
    Ok(())
}

pub async fn status(ctx: &Context, id: &str) -> anyhow::Result<()> {
    let dist = ctx
        .state
        .distributor
        .status(id)
        .await
        .ok_or_else(|| anyhow::anyhow!("distribution '{id}' not found"))?;

    println!("Distribution: {}", dist.id);
    println!("Policy ....... {} (v{})", dist.policy_name, dist.version);
    println!("Outcome ...... {:?}", dist.outcome);
    println!("Progress ..... {}/{} completed ({:.1}%)", dist.completed(), dist.total(), dist.success_rate());
    println!();
    println!("{:<36} {:<12} {:<8}", "AGENT", "STATE", "RETRIES");
    println!("{}", "-".repeat(58));
    for (agent_id, agent_status) in &dist.agents {
        let state = format!("{:?}", agent_status.state);
        println!("{:<36} {:<12} {:<8}", agent_id, state, agent_status.retry_count);
    }
    Ok(())
}

pub async fn cancel(ctx: &Context, id: &str) -> anyhow::Result<()> {
    ctx.state.distributor.cancel(id).await?;
    println!("Cancelled distribution '{id}'");
    Ok(())
}
