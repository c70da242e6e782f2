use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    equity_quant::app_init().await?;
    equity_quant::app::bootstrap::run().await
}
