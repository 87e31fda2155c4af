pub mod commands;
pub mod error;
pub mod services;
pub mod state;

use std::io::Write;

use error::ExoError;
use services::ConfigService;
use state::AppState;

pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .init();

    // One task owns the chat state; a single-threaded runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut config_service = ConfigService::new()?;

        let app_state = match AppState::from_config(&config_service) {
            Ok(state) => state,
            Err(ExoError::Unauthenticated(reason)) => {
                log::warn!("Chat needs a session token: {}", reason);
                let Some(token) = prompt_for_token()? else {
                    println!(
                        "Not signed in. Set auth.token in {:?} or EXO_CHAT__AUTH__TOKEN.",
                        config_service.path()
                    );
                    return Ok(());
                };
                config_service.save_token(&token)?;
                AppState::from_config(&config_service)?
            }
            Err(e) => return Err(e.into()),
        };

        commands::run_repl(app_state).await?;
        log::info!("Bye");
        Ok::<(), anyhow::Error>(())
    })
}

/// Ask for a session token on stdin. A blank line or end of input skips.
fn prompt_for_token() -> std::io::Result<Option<String>> {
    print!("Please sign in. Session token: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let token = line.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}
