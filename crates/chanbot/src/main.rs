use std::sync::Arc;

use chanbot_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), chanbot_core::Error> {
    chanbot_core::logging::init("chanbot")?;

    let cfg = Arc::new(Config::load()?);

    chanbot_console::router::run(cfg)
        .await
        .map_err(|e| chanbot_core::Error::Transport(format!("console adapter failed: {e}")))?;

    Ok(())
}
