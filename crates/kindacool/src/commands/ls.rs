pub async fn handle() -> anyhow::Result<()> {
    let manager = super::manager()?;
    let mut clusters = manager.list().await?;
    clusters.sort();

    for name in clusters {
        println!("{}", name);
    }
    Ok(())
}
