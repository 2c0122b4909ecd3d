//! scrollwatchd service wiring
//!
//! Ties together:
//! - Configuration loading and reload
//! - Two-tier store (in-memory fast tier, SQLite durable tier)
//! - Rule engine and its timers
//! - IPC server and event fan-out

use anyhow::{Context, Result};
use scrollwatch_api::{
    API_VERSION, Command, ErrorCode, ErrorInfo, Event, EventPayload, Request, Response,
    ResponsePayload, SubscriberScope,
};
use scrollwatch_config::{Policy, load_config_or_default};
use scrollwatch_core::{Notifier, RuleEngine, Scheduler, SharedEngine};
use scrollwatch_ipc::{IpcServer, ServerMessage};
use scrollwatch_store::{BatchStore, MemoryStore, SqliteStore};
use scrollwatch_util::{ClientId, Domain};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// File name of the durable store inside the data directory
pub const DATABASE_FILE: &str = "scrollwatchd.db";

/// Startup options, usually from the command line
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub config_path: PathBuf,
    /// Overrides the configured socket path
    pub socket_path: Option<PathBuf>,
    /// Overrides the configured data directory
    pub data_dir: Option<PathBuf>,
}

/// Main service state
pub struct Service {
    options: ServiceOptions,
    policy: Policy,
    engine: SharedEngine,
    store: BatchStore,
    notifier: Notifier,
    scheduler: Scheduler,
    ipc: Arc<IpcServer>,
}

impl Service {
    pub async fn new(options: ServiceOptions) -> Result<Self> {
        let policy = load_config_or_default(&options.config_path)
            .with_context(|| format!("Failed to load config from {:?}", options.config_path))?;

        info!(
            config_path = %options.config_path.display(),
            rule_count = policy.rules.len(),
            "Configuration loaded"
        );

        let socket_path = options
            .socket_path
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = options
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILE);
        let durable = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?;

        info!(db_path = %db_path.display(), "Store initialized");

        let store = BatchStore::new(Arc::new(MemoryStore::new()), Arc::new(durable));
        store.initialize().await;

        let notifier = Notifier::default();
        let mut engine = RuleEngine::new(store.clone(), notifier.clone(), policy.service.engine).await;
        let applied = engine.apply_rules(&policy.rules, scrollwatch_util::now()).await;
        debug!(applied, "Configured rules applied");

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start()
            .await
            .with_context(|| format!("Failed to listen on {:?}", socket_path))?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            options,
            policy,
            engine: Arc::new(Mutex::new(engine)),
            scheduler: Scheduler::new(store.clone()),
            store,
            notifier,
            ipc: Arc::new(ipc),
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.ipc.socket_path()
    }

    /// Run until SIGTERM or SIGINT
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until a termination signal arrives or `shutdown` completes
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        let ipc = self.ipc.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Every block state change goes out to subscribed clients; the IPC
        // layer filters by each client's scope.
        let mut notifications = self.notifier.subscribe(SubscriberScope::Management);

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to create SIGUSR1 handler")?;

        self.scheduler
            .start(self.engine.clone(), &self.policy.service.engine);

        info!("Service running");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Signal: SIGHUP - reload configuration
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.reload().await;
                }

                // Signal: SIGUSR1 - host is suspending, persist now
                _ = sigusr1.recv() => {
                    info!("Received SIGUSR1, flushing state");
                    self.store.flush().await;
                }

                Some(notification) = notifications.recv() => {
                    ipc.broadcast_event(Event::page(notification.domain, notification.signal));
                }

                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&self.engine, &ipc, msg).await;
                }
            }
        }

        info!("Shutting down scrollwatchd");

        ipc.broadcast_event(Event::new(EventPayload::Shutdown));
        self.scheduler.stop();
        self.store.shutdown().await;
        ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    async fn reload(&mut self) {
        let policy = match load_config_or_default(&self.options.config_path) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(error = %e, "Config reload failed, keeping current configuration");
                return;
            }
        };

        if self.options.socket_path.is_none()
            && policy.service.socket_path != self.policy.service.socket_path
        {
            warn!("Socket path change takes effect after restart");
        }
        if self.options.data_dir.is_none() && policy.service.data_dir != self.policy.service.data_dir {
            warn!("Data directory change takes effect after restart");
        }

        {
            let mut engine = self.engine.lock().await;
            engine.set_config(policy.service.engine);
            engine
                .apply_rules(&policy.rules, scrollwatch_util::now())
                .await;
        }

        self.scheduler
            .start(self.engine.clone(), &policy.service.engine);

        info!(rule_count = policy.rules.len(), "Configuration reloaded");
        self.policy = policy;
    }

    async fn handle_ipc_message(engine: &SharedEngine, ipc: &Arc<IpcServer>, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                if let Some(response) = Self::handle_request(engine, ipc, &client_id, request).await {
                    let _ = ipc.send_response(&client_id, response).await;
                }
            }

            ServerMessage::ClientConnected { client_id, peer_uid } => {
                debug!(client_id = %client_id, uid = ?peer_uid, "Client registered");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }

    /// Handle one request; `None` for fire-and-forget commands
    async fn handle_request(
        engine: &SharedEngine,
        ipc: &Arc<IpcServer>,
        client_id: &ClientId,
        request: Request,
    ) -> Option<Response> {
        let request_id = request.request_id;
        let expects_response = request.command.expects_response();

        if request.api_version != API_VERSION {
            warn!(
                client_id = %client_id,
                api_version = request.api_version,
                "Unsupported API version"
            );
            return expects_response.then(|| {
                Response::error(
                    request_id,
                    ErrorInfo::new(
                        ErrorCode::InvalidRequest,
                        format!("Unsupported API version {}", request.api_version),
                    ),
                )
            });
        }

        let now = scrollwatch_util::now();

        match request.command {
            Command::Tick { domain, timestamp } => {
                let Some(domain) = Domain::parse(&domain) else {
                    debug!(domain = %domain, "Dropping tick with malformed domain");
                    return None;
                };
                let outcome = engine.lock().await.process_tick(&domain, timestamp, now).await;
                debug!(domain = %domain, outcome = ?outcome, "Tick processed");
                None
            }

            Command::UpdateRules { watchlist } => {
                engine.lock().await.replace_watchlist(watchlist, now).await;
                None
            }

            Command::CheckStatus { domain } => {
                let Some(domain) = Domain::parse(&domain) else {
                    debug!(domain = %domain, "Status check for malformed domain");
                    return Some(invalid_domain(request_id, &domain));
                };
                let is_blocked = engine.lock().await.check_status(&domain, now).await;
                Some(Response::success(
                    request_id,
                    ResponsePayload::Status { is_blocked },
                ))
            }

            Command::Subscribe { scope } => {
                let scope = match scope {
                    SubscriberScope::Management => SubscriberScope::Management,
                    SubscriberScope::Domain { domain } => match Domain::parse(domain.as_str()) {
                        Some(domain) => SubscriberScope::Domain { domain },
                        None => return Some(invalid_domain(request_id, domain.as_str())),
                    },
                };

                if !ipc.set_subscription(client_id, Some(scope.clone())).await {
                    return None;
                }
                info!(client_id = %client_id, scope = ?scope, "Client subscribed");
                Some(Response::success(
                    request_id,
                    ResponsePayload::Subscribed {
                        client_id: client_id.clone(),
                    },
                ))
            }

            Command::Unsubscribe => {
                ipc.set_subscription(client_id, None).await;
                Some(Response::success(request_id, ResponsePayload::Unsubscribed))
            }

            Command::GetState => {
                let state = engine.lock().await.snapshot();
                Some(Response::success(request_id, ResponsePayload::State(state)))
            }

            Command::ClearData => {
                engine.lock().await.wipe(now).await;
                Some(Response::success(request_id, ResponsePayload::Cleared))
            }

            Command::Ping => Some(Response::success(request_id, ResponsePayload::Pong)),
        }
    }
}

fn invalid_domain(request_id: u64, domain: &str) -> Response {
    Response::error(
        request_id,
        ErrorInfo::new(ErrorCode::InvalidDomain, format!("Invalid domain: {domain:?}")),
    )
}
