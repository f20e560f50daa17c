use kindacool_k3s::OutputKey;

pub async fn handle(name: &str, export: bool) -> anyhow::Result<()> {
    if export {
        let path = kindacool_config::kubeconfig_file(name)?;
        println!("export KUBECONFIG=\"{}\"", path.display());
        return Ok(());
    }

    let manager = super::manager()?;
    let kubeconfig = manager.fetch_output(name, OutputKey::Kubeconfig).await?;
    print!("{}", kubeconfig.expose());
    Ok(())
}
