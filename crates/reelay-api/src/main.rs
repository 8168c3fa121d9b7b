use reelay_api::setup;
use reelay_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (state, router) = setup::initialize_app(config.clone()).await?;
    setup::server::start_server(&config, state, router).await?;

    Ok(())
}
