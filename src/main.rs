#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    content_ledger::server::run().await
}
