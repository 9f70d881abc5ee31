pub fn run() -> anyhow::Result<()> {
    println!("agentfleet {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
