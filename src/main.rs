use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    sc_cli::run().await
}
