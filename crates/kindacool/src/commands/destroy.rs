use crate::progress::ClusterProgress;
use colored::Colorize;

pub async fn handle(name: &str, verbose: bool) -> anyhow::Result<()> {
    let manager = super::manager()?;
    manager.ensure_environment().await?;

    let progress = ClusterProgress::new(&format!("Destroying cluster {}...", name), verbose);
    let destroyed = match manager.destroy(name).await {
        Ok(destroyed) => destroyed,
        Err(e) => {
            progress.finish_error();
            return Err(e.into());
        }
    };

    if kindacool_config::remove_kubeconfig(name)? {
        tracing::debug!("Removed kubeconfig of {}", name);
    }

    if destroyed {
        progress.finish_success(&format!("Cluster {} destroyed", name));
    } else {
        progress.finish_success(&format!("No cluster named {}", name.yellow()));
    }
    Ok(())
}
