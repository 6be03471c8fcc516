mod config;
use config::ChatAgentConfig;
use parley_core::{
    ChatSession, CurrentTimeTool, EngineConfig, InMemoryConversationStore, PluginCatalog,
    ProviderManager,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,parley_core=info,chat_agent=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(target = "chat_agent", "Starting chat agent demo");

    // Engine: env defaults + optional parley.toml; fails fast without a usable default provider
    let engine_cfg = EngineConfig::load();
    let default_provider = engine_cfg.default_provider;
    let manager = Arc::new(ProviderManager::from_config(engine_cfg)?);

    let cfg = ChatAgentConfig::load();
    let persona = cfg.persona();

    let mut plugins = PluginCatalog::new();
    plugins.register(&persona.name, Arc::new(CurrentTimeTool::new()));
    manager.switch_persona(&persona, &plugins);

    let active = manager.switch_provider(default_provider.as_str()).await?;
    info!(target = "chat_agent", provider = %active, model = ?manager.active_model(), persona = %persona.name, "Ready");

    let store = Arc::new(InMemoryConversationStore::new());
    let session = ChatSession::new(Arc::clone(&manager), store, persona);
    let options = cfg.generate_options();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let chat_loop = async {
        loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('/') {
                let mut parts = rest.splitn(2, ' ');
                let command = parts.next().unwrap_or_default();
                let arg = parts.next().map(str::trim).unwrap_or_default();
                match (command, arg) {
                    ("quit" | "exit", _) => break,
                    ("provider", id) if !id.is_empty() => match manager.switch_provider(id).await {
                        Ok(p) => {
                            let msg = format!(
                                "provider: {} (model {})\n",
                                p,
                                manager.active_model().unwrap_or_default()
                            );
                            stdout.write_all(msg.as_bytes()).await?;
                        }
                        Err(e) => error!(target = "chat_agent", error = %e, "Provider switch failed"),
                    },
                    ("model", id) if !id.is_empty() => match manager.set_model(id).await {
                        Ok(()) => stdout.write_all(format!("model: {}\n", id).as_bytes()).await?,
                        Err(e) => error!(target = "chat_agent", error = %e, "Model switch failed"),
                    },
                    _ => {
                        warn!(target = "chat_agent", command = %line, "Unknown command");
                        stdout
                            .write_all(b"commands: /provider <id>, /model <id>, /quit\n")
                            .await?;
                    }
                }
                continue;
            }

            match session
                .respond(&cfg.user, &cfg.conversation_id, line, &options)
                .await
            {
                Ok(reply) => {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                Err(e) => error!(target = "chat_agent", error = %e, "Turn failed"),
            }
        }
        Ok::<(), std::io::Error>(())
    };

    tokio::select! {
        res = chat_loop => {
            res?;
        }
        _ = signal::ctrl_c() => {
            info!(target = "chat_agent", "Shutting down...");
        }
    }

    let stats = manager.dispatcher().stats();
    info!(target = "chat_agent", rounds = stats.total_rounds, tool_calls = stats.total_tool_calls, tool_errors = stats.total_tool_errors, "Session finished");
    Ok(())
}
