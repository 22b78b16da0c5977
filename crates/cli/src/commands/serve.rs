//! `parley serve`: Start the HTTP chat server.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Parley");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Engine:    {:?} ({})", config.engine.kind, engine_label(&config));
    println!("   History:   {}", config.history.path.display());

    parley_gateway::start(config).await?;

    Ok(())
}

fn engine_label(config: &parley_config::AppConfig) -> &str {
    match config.engine.kind {
        parley_config::EngineKind::OpenaiCompat => &config.engine.model,
        parley_config::EngineKind::Local => &config.engine.local_model,
    }
}
