#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kicadhub_app::run().await
}
