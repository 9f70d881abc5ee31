use crate::commands::Context;
use chrono::{Duration, Utc};

pub async fn fleet(ctx: &Context) -> anyhow::Result<()> {
    let report = ctx.state.compliance.generate_fleet_overview(None).await;
    println!("Total agents ............. {}", report.total_agents);
    println!("Active ................... {}", report.active_agents);
    println!("Offline .................. {}", report.offline_agents);
    println!("Average compliance ....... {:.1}", report.average_compliance_score);
    println!("Compliant ................ {}", report.compliant_agents);
    println!("Non-compliant ............ {}", report.non_compliant_agents);
    println!("Critical .................. {}", report.critical_agents);
    println!("Policies deployed ........ {}", report.total_policies_deployed);
    println!("  successful ............. {}", report.successful_deployments);
    println!("  failed ................. {}", report.failed_deployments);
    println!("Bytes freed .............. {}", report.total_bytes_freed);
    println!("Cleanup operations ....... {}", report.total_cleanup_operations);
    Ok(())
}

pub async fn agent(ctx: &Context, id: &str) -> anyhow::Result<()> {
    let report = ctx.state.compliance.generate_agent_report(id).await?;
    println!("Agent: {} ({})", report.agent_id, report.hostname);
    println!("Tags: {}", report.tags.join(", "));
    println!("Overall score ............ {:.1}", report.compliance_score.overall);
    println!("Policy score ............. {:.1}", report.compliance_score.policy);
    println!("Health score .............. {:.1}", report.compliance_score.health);
    println!("Connectivity score ........ {:.1}", report.compliance_score.connectivity);
    println!("Level ..................... {:?}", report.compliance_score.compliance_level());
    println!("Bytes freed ............... {}", report.total_bytes_freed);
    println!("Cleanup count ............. {}", report.cleanup_count);
    Ok(())
}

pub async fn policy_execution(ctx: &Context, distribution_id: &str) -> anyhow::Result<()> {
    let report = ctx.state.compliance.generate_policy_execution_report(distribution_id).await?;
    println!("Policy: {} (v{})", report.policy_name, report.version);
    println!("Targeted agents: {}", report.total_targeted_agents);
    println!("Success rate: {:.1}%", report.success_rate);
    println!();
    for (agent_id, state) in &report.per_agent_status {
        println!("  {agent_id:<36} {state}");
    }
    Ok(())
}

pub async fn audit_summary(ctx: &Context) -> anyhow::Result<()> {
    let end = Utc::now();
    let start = end - Duration::hours(24);
    let summary = ctx.state.compliance.generate_audit_log_summary(start, end).await?;
    println!("Audit summary (last 24h)");
    println!("Total entries: {}", summary.total_entries);
    println!();
    println!("By severity:");
    for (severity, count) in &summary.entries_by_severity {
        println!("  {severity:<10} {count}");
    }
    println!();
    println!("By category:");
    for (category, count) in &summary.entries_by_category {
        println!("  {category:<10} {count}");
    }
    Ok(())
}
