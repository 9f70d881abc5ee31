use crate::commands::Context;

pub async fn stats(ctx: &Context) -> anyhow::Result<()> {
    let stats = ctx.state.registry.statistics().await;
    println!("Total agents ....... {}", stats.total_agents);
    println!("Active ............. {}", stats.active_agents);
    println!("Offline ............ {}", stats.offline_agents);
    println!("Pending ............ {}", stats.pending_agents);
    println!("Healthy ............ {}", stats.healthy_agents);
    println!("Warning ............ {}", stats.warning_agents);
    println!("Critical ........... {}", stats.critical_agents);
    Ok(())
}

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let agents = ctx.state.registry.all_agents().await;

    println!(
        "{:<36} {:<24} {:<12} {:<10}",
        "ID", "HOSTNAME", "STATE", "HEALTH"
    );
    println!("{}", "-".repeat(86));

    for agent in &agents {
        let health = agent
            .latest_status
            .as_ref()
            .map(|s| format!("{:?}", s.health))
            .unwrap_or_else(|| "Unknown".to_string());
        let state = format!("{:?}", agent.state);
        println!(
            "{:<36} {:<24} {:<12} {:<10}",
            agent.identity.id, agent.identity.hostname, state, health
        );
    }

    println!("\nTotal: {} agents", agents.len());
    Ok(())
}
