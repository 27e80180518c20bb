//! Reference client binary, matching the original CLI flag set (spec §6).
//! Reconnects with a 5s sleep on any non-fatal disconnect, resuming from the
//! persisted `last_sync` watermark.

use clap::Parser;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{error, info, warn};

use commy_sync::auth::basic_auth_header;
use commy_sync::config::ClientConfig;
use commy_sync::coordination::session_store::{SessionRecord, SessionRecordStore};
use commy_sync::coordination::{InMemoryPubSub, InMemorySessionStore, PubSub};
use commy_sync::local_store::{LocalStore, SyncState};
use commy_sync::protocol::v1;
use commy_sync::session::transport::{Frame, FrameTransport};
use commy_sync::session::SessionController;
use commy_sync::storage::LocalStorageDriver;
use commy_sync::strategy::{ClientLockWrapper, LastModifiedStrategy, SyncStrategy};

#[derive(Parser, Debug)]
#[command(name = "commy-client")]
struct Args {
    #[arg(long, default_value = "localhost:8080")]
    host: String,
    #[arg(long, default_value = "root")]
    username: String,
    #[arg(long, default_value = "toor")]
    password: String,
    #[arg(long, default_value = "testVault")]
    vault_name: String,
    #[arg(long, default_value = ".dev/clientFolder")]
    vault_path: std::path::PathBuf,
    #[arg(long, default_value_t = 1)]
    sync_strategy: u8,
}

#[tokio::main]
async fn main() {
    commy_sync::logging::init();
    let args = Args::parse();

    let config = ClientConfig {
        host: args.host,
        username: args.username,
        password: args.password,
        vault_name: args.vault_name,
        vault_path: args.vault_path,
        sync_strategy: args.sync_strategy,
        websocket_version: 1,
    };

    let store = match LocalStore::open(&config).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "failed to initialize local settings store");
            std::process::exit(1);
        }
    };

    let bus = Arc::new(InMemoryPubSub::new());
    let sessions: Arc<dyn SessionRecordStore> = Arc::new(InMemorySessionStore::new());
    let mut first_attempt = true;

    loop {
        match run_once(&config, &store, bus.clone(), sessions.clone()).await {
            Ok(()) => {
                info!("session ended gracefully");
                std::process::exit(0);
            }
            Err(e) if first_attempt && !e.is_retryable() => {
                error!(error = %e, "initial connection failed");
                std::process::exit(1);
            }
            Err(e) => {
                warn!(error = %e, "disconnected, retrying in 5s");
                first_attempt = false;
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }
}

async fn run_once(
    config: &ClientConfig,
    store: &LocalStore,
    bus: Arc<InMemoryPubSub>,
    sessions: Arc<dyn SessionRecordStore>,
) -> commy_sync::VaultResult<()> {
    let url = format!("ws://{}/api/v1/ws/", config.host);
    let mut request = url
        .into_client_request()
        .map_err(|e| commy_sync::VaultError::Transport(e.to_string()))?;
    request.headers_mut().insert(
        "Authorization",
        basic_auth_header(&config.username, &config.password)
            .parse()
            .map_err(|_| commy_sync::VaultError::Transport("invalid auth header".to_string()))?,
    );

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| commy_sync::VaultError::Transport(e.to_string()))?;

    let transport: Box<dyn FrameTransport> = Box::new(ws_stream);
    let controller = SessionController::new(transport);
    controller.send_version(config.websocket_version).await?;

    let transport_mutex = controller.transport();
    let mut transport_guard = transport_mutex.lock().await;

    v1::send_vault_name(&mut **transport_guard, &config.vault_name).await?;
    v1::send_sync_strategy(&mut **transport_guard, config.sync_strategy).await?;

    let session_record = SessionRecord::new(
        config.username.clone(),
        config.vault_name.clone(),
        config.sync_strategy,
    );
    let session_id = session_record.session_id;
    sessions.put(session_record).await;
    info!(%session_id, "session persisted");

    // Persisted session record is removed on the way out regardless of how
    // the connection ends (spec §3: destroyed on connection close).
    let result: commy_sync::VaultResult<()> = async {
        let driver = Arc::new(
            LocalStorageDriver::open(&config.vault_path, &config.vault_name).await?,
        );
        let base_strategy: Arc<dyn SyncStrategy> = Arc::new(LastModifiedStrategy::new(
            driver.clone() as Arc<dyn commy_sync::storage::StorageDriver>
        ));
        let strategy: Arc<dyn SyncStrategy> = Arc::new(ClientLockWrapper::new(base_strategy));

        let sync_state = store.load_sync_state().await?;
        let new_watermark = v1::run_initiator_sync(
            &mut **transport_guard,
            driver.as_ref(),
            strategy.as_ref(),
            sync_state.last_sync,
        )
        .await?;
        store
            .save_sync_state(&SyncState {
                last_sync: new_watermark,
            })
            .await?;
        info!(last_sync = new_watermark, "initial reconciliation complete");

        let (mut watcher_rx, _watcher) = commy_sync::storage::watcher::watch_vault(
            config.vault_path.join(&config.vault_name),
            config.username.clone(),
            config.vault_name.clone(),
        )
        .map_err(|e| commy_sync::VaultError::Transport(e.to_string()))?;

        let topic = commy_sync::coordination::bus::topic_for(&config.username, &config.vault_name);
        let mut bus_rx = bus.subscribe(&topic).await;
        let bus: Arc<dyn commy_sync::coordination::PubSub> = bus;

        loop {
            let keep_going = v1::steady_state_tick(
                &mut **transport_guard,
                driver.as_ref(),
                strategy.as_ref(),
                &mut watcher_rx,
                &bus,
                &mut bus_rx,
                &config.username,
                &config.vault_name,
                session_id,
            )
            .await?;
            sessions.touch(session_id).await;
            if !keep_going {
                break;
            }
        }

        Ok(())
    }
    .await;

    sessions.remove(session_id).await;

    transport_guard
        .send(Frame::Close(Some("client shutting down".to_string())))
        .await
        .ok();
    result
}
