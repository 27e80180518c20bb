//! Reference server binary. Production deployments put a real HTTP layer in
//! front of the engine (the out-of-scope upgrade + credential check); this
//! binary embeds a minimal stand-in so the crate is runnable end to end.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use commy_sync::auth::{decode_basic_auth, CredentialVerifier, TableCredentialVerifier};
use commy_sync::config::ServerConfig;
use commy_sync::coordination::session_store::{SessionRecord, SessionRecordStore};
use commy_sync::coordination::{
    DistributedLock, InMemoryLock, InMemoryPubSub, InMemorySessionStore, PubSub,
};
use commy_sync::protocol::v1;
use commy_sync::session::transport::{Frame, FrameTransport};
use commy_sync::session::SessionController;
use commy_sync::storage::LocalStorageDriver;
use commy_sync::strategy::{LastModifiedStrategy, ServerLockWrapper, SyncStrategy};

#[derive(Parser, Debug)]
#[command(name = "commy-server")]
struct Args {
    /// Address to bind the WebSocket listener to; falls back to
    /// `ServerConfig::from_env` / `BIND_ADDRESS` when unset.
    #[arg(long)]
    bind_address: Option<String>,
}

#[tokio::main]
async fn main() {
    commy_sync::logging::init();
    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(bind) = args.bind_address {
        config.bind_address = bind;
    }

    let verifier: Arc<dyn CredentialVerifier> = {
        let table = TableCredentialVerifier::new();
        table.set_password("root", "toor").await;
        Arc::new(table)
    };
    let lock = Arc::new(InMemoryLock::new());
    let bus = Arc::new(InMemoryPubSub::new());
    let sessions: Arc<dyn SessionRecordStore> = Arc::new(InMemorySessionStore::new());

    let listener = match TcpListener::bind(&config.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, address = %config.bind_address, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(address = %config.bind_address, "commy-server listening");

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let config = config.clone();
        let verifier = verifier.clone();
        let lock = lock.clone();
        let bus = bus.clone();
        let sessions = sessions.clone();

        tokio::spawn(async move {
            if let Err(e) =
                handle_connection(stream, peer_addr, config, verifier, lock, bus, sessions).await
            {
                warn!(error = %e, %peer_addr, "connection terminated with an error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    verifier: Arc<dyn CredentialVerifier>,
    lock: Arc<dyn commy_sync::coordination::DistributedLock>,
    bus: Arc<dyn commy_sync::coordination::PubSub>,
    sessions: Arc<dyn SessionRecordStore>,
) -> commy_sync::VaultResult<()> {
    let mut owner = String::new();
    let mut presented_password = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &tokio_tungstenite::tungstenite::handshake::server::Request,
         response: tokio_tungstenite::tungstenite::handshake::server::Response| {
            let header = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if let Some((user, pass)) = decode_basic_auth(header) {
                owner = user;
                presented_password = pass;
            }
            Ok(response)
        },
    )
    .await
    .map_err(|e| commy_sync::VaultError::Transport(e.to_string()))?;

    // Credential verification happens out-of-band in production (spec §1);
    // this reference binary performs it here since it owns the upgrade.
    let header_user = owner.clone();
    if header_user.is_empty() || !verifier.verify(&header_user, &presented_password).await {
        warn!(%peer_addr, "rejecting connection with invalid credentials");
        return Err(commy_sync::VaultError::Authentication(header_user));
    }

    info!(%peer_addr, owner = %header_user, "accepted connection");

    let transport: Box<dyn FrameTransport> = Box::new(ws_stream);
    let controller = SessionController::new(transport);
    let version = controller.negotiate_version().await?;
    info!(version, "handshake: version negotiated");

    // Handshake proper (vault_name / sync_strategy / sync) and the rest of
    // the session run against the raw transport directly: the Processor
    // needs sole ownership of it for the body-framing discipline.
    let transport_mutex = controller.transport();
    let mut transport_guard = transport_mutex.lock().await;

    let vault_name = v1::recv_vault_name(&mut **transport_guard).await?;
    let sync_strategy = v1::recv_sync_strategy(&mut **transport_guard).await?;

    let session_record = SessionRecord::new(header_user.clone(), vault_name.clone(), sync_strategy);
    let session_id = session_record.session_id;
    sessions.put(session_record).await;
    info!(%session_id, owner = %header_user, vault = %vault_name, "session persisted");

    // Persisted session record is removed on the way out regardless of how
    // the connection ends (spec §3: destroyed on connection close).
    let result: commy_sync::VaultResult<()> = async {
        let driver = Arc::new(
            LocalStorageDriver::open(&config.local_vaults_root, &vault_name).await?,
        );
        let base_strategy: Arc<dyn SyncStrategy> = Arc::new(LastModifiedStrategy::new(
            driver.clone() as Arc<dyn commy_sync::storage::StorageDriver>
        ));
        let strategy: Arc<dyn SyncStrategy> = Arc::new(ServerLockWrapper::new(
            base_strategy,
            lock,
            header_user.clone(),
            vault_name.clone(),
        ));

        let last_sync = v1::run_responder_sync(
            &mut **transport_guard,
            driver.as_ref(),
            &header_user,
            &vault_name,
        )
        .await?;
        info!(last_sync, "initial reconciliation complete");

        let (mut watcher_rx, _watcher) = commy_sync::storage::watcher::watch_vault(
            config.local_vaults_root.join(&vault_name),
            header_user.clone(),
            vault_name.clone(),
        )
        .map_err(|e| commy_sync::VaultError::Transport(e.to_string()))?;

        let topic = commy_sync::coordination::bus::topic_for(&header_user, &vault_name);
        let mut bus_rx = bus.subscribe(&topic).await;

        loop {
            let keep_going = v1::steady_state_tick(
                &mut **transport_guard,
                driver.as_ref(),
                strategy.as_ref(),
                &mut watcher_rx,
                &bus,
                &mut bus_rx,
                &header_user,
                &vault_name,
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
        .send(Frame::Close(Some("session ended".to_string())))
        .await
        .ok();
    result
}
