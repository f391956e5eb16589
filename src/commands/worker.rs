pub(crate) async fn cmd_worker(name: &str) -> anyhow::Result<()> {
    tracing::debug!(worker = %name, pid = std::process::id(), "Worker process started");
    norn::worker::entry(name).await
}
