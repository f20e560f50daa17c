use kindacool_k3s::OutputKey;

pub async fn handle(name: &str) -> anyhow::Result<()> {
    let manager = super::manager()?;
    let key = manager.fetch_output(name, OutputKey::SshKey).await?;
    println!("{}", key.expose().trim_end());
    Ok(())
}
