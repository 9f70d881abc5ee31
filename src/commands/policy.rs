use crate::commands::Context;
use agentfleet::policy::bundles;
use agentfleet::policy::validator;
use anyhow::Context as _;

pub async fn validate(file: &str) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    let policy: agentfleet::model::Policy =
        serde_json::from_str(&text).with_context(|| format!("parsing {file} as a policy document"))?;
    let report = validator::validate(&policy);

    if report.errors.is_empty() {
        println!("VALID");
    } else {
        println!("INVALID");
        for err in &report.errors {
            println!("  error: {err}");
        }
    }
    for warn in &report.warnings {
        println!("  warning: {warn}");
    }
    if !report.valid {
        anyhow::bail!("policy failed validation");
    }
    Ok(())
}

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let policies = ctx.state.policies.list().await?;
    println!("{:<24} {:<10} {:<8} {:<8}", "NAME", "PRIORITY", "RULES", "ENABLED");
    println!("{}", "-".repeat(56));
    for p in &policies {
        println!(
            "{:<24} {:<10?} {:<8} {:<8}",
            p.name,
            p.priority,
            p.rules.len(),
            p.enabled
        );
    }
    println!("\nTotal: {} policies", policies.len());
    Ok(())
}

pub async fn show(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let policy = ctx.state.policies.get(name).await?;
    let yaml = serde_yaml::to_string(&policy)?;
    print!("{yaml}");
    Ok(())
}

pub async fn import(ctx: &Context, file: &str, overwrite: bool) -> anyhow::Result<()> {
    let blob = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    let policy: agentfleet::model::Policy =
        serde_json::from_str(&blob).with_context(|| format!("parsing {file} as a policy document"))?;
    let saved = ctx.state.policies.save(policy, overwrite).await?;
    println!("Saved policy '{}'", saved.name);
    Ok(())
}

pub async fn export(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let blob = ctx.state.policies.export(name).await?;
    println!("{blob}");
    Ok(())
}

pub async fn merge(ctx: &Context, names: &[String], new_name: &str) -> anyhow::Result<()> {
    let merged = ctx.state.policies.merge(names, new_name).await?;
    println!("Created merged policy '{}' with {} rules", merged.name, merged.rules.len());
    Ok(())
}

pub fn bundle_list() -> anyhow::Result<()> {
    println!("{:<15} DESCRIPTION", "NAME");
    println!("{}", "-".repeat(70));
    for bundle in bundles::all_bundles() {
        println!("{:<15} {}", bundle.name, bundle.description);
    }
    Ok(())
}

pub fn bundle_show(name: &str) -> anyhow::Result<()> {
    let bundle = bundles::get_bundle(name).ok_or_else(|| unknown_bundle(name))?;
    println!("Bundle: {}", bundle.name);
    println!("Description: {}", bundle.description);
    println!();
    print!("{}", serde_yaml::to_string(&bundle.spec)?);
    Ok(())
}

pub async fn bundle_apply(ctx: &Context, name: &str, policy_name: &str) -> anyhow::Result<()> {
    let bundle = bundles::get_bundle(name).ok_or_else(|| unknown_bundle(name))?;
    let mut spec = bundle.spec;
    spec.name = policy_name.to_string();
    let saved = ctx.state.policies.save(spec, true).await?;
    println!("Saved '{}' from bundle '{}'", saved.name, bundle.name);
    Ok(())
}

fn unknown_bundle(name: &str) -> anyhow::Error {
    let available: Vec<String> = bundles::all_bundles().into_iter().map(|b| b.name).collect();
    anyhow::anyhow!("Unknown bundle '{}'. Available bundles: {}", name, available.join(", "))
}
