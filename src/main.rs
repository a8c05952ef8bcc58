#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weave_cli::cli::run().await
}
