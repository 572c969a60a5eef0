mod identity;
mod input;
mod terminal;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::info;

use parlor_session::machine::Session;
use parlor_session::nav::NavigationSignal;
use parlor_store::LiveStore;

use crate::terminal::TerminalSurface;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=info".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("PARLOR_DB_PATH").unwrap_or_else(|_| "parlor.db".into());
    let identity_path =
        std::env::var("PARLOR_IDENTITY_PATH").unwrap_or_else(|_| "parlor.id".into());

    // A room slug on the command line acts like opening a shared link
    let initial_room = std::env::args().nth(1);

    // Identity must exist before the core starts
    let client_id = identity::load_or_create(&PathBuf::from(&identity_path))?;
    info!("client identity {}", client_id);

    // Store
    let db = parlor_db::Database::open(&PathBuf::from(&db_path))?;
    let store = LiveStore::new(db);

    // Wire the core to the terminal
    let nav = NavigationSignal::new(initial_room);
    let (surface, view_state) = TerminalSurface::new();
    let (command_tx, command_rx) = mpsc::channel(64);

    let session = Session::new(store, &client_id, nav, surface);

    let input = tokio::spawn(input::run(view_state, command_tx));

    session.run(command_rx).await?;
    input.abort();

    Ok(())
}
