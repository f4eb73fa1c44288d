// ProspectFlow CLI entry point

use prospectflow_cli::router::CommandRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    CommandRouter::route()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
}
