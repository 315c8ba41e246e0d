//! Worker runtime. Wires the loops, the dispatcher and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::types::{LogEntry, LogLevel};
use crate::client::ServerApi;
use crate::config::WorkerConfig;
use crate::error::Error;
use crate::metrics::MetricsSampler;
use crate::processor::{LogSink, ProcessorRegistry};
use crate::scheduler::{AddressCache, Discovery, Heartbeat, InstanceReporter, LogShipper};
use crate::store::{Storage, StorageLister};
use crate::tracker::InstanceTracker;
use crate::worker::dispatcher::Dispatcher;
use crate::worker::routes::worker_routes;

/// Collaborators the runtime is assembled from.
pub struct WorkerDeps {
    pub api: Arc<dyn ServerApi>,
    pub store: Arc<dyn Storage>,
    pub registry: Arc<ProcessorRegistry>,
    pub sampler: Arc<dyn MetricsSampler>,
}

/// A running worker agent.
pub struct WorkerRuntime {
    root: CancellationToken,
    local_addr: SocketAddr,
    worker_address: String,
    app_id: i64,
    cache: Arc<AddressCache>,
    dispatcher: Arc<Dispatcher>,
    log_shipper: LogShipper,
    loops: Vec<(&'static str, JoinHandle<()>)>,
    server: JoinHandle<()>,
}

impl WorkerRuntime {
    /// Start every component. Only a listener bind failure is fatal.
    pub async fn start(
        config: WorkerConfig,
        deps: WorkerDeps,
        root: CancellationToken,
    ) -> Result<Self, Error> {
        let WorkerDeps {
            api,
            store,
            registry,
            sampler,
        } = deps;

        let app_id = match api
            .assert_app(&config.bootstrap_server, &config.app_name)
            .await
        {
            Ok(id) => {
                info!(app_id = id, app = %config.app_name, "Application registered");
                id
            }
            Err(e) => {
                warn!(app = %config.app_name, error = %e, "Application check failed, continuing with app id 0");
                0
            }
        };

        let bind_err = |source| Error::Bind {
            addr: config.listen_addr,
            source,
        };
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let worker_address = if config.listen_addr.port() == 0
            && config.worker_address == config.listen_addr.to_string()
        {
            local_addr.to_string()
        } else {
            config.worker_address.clone()
        };

        let cache = Arc::new(AddressCache::new(config.bootstrap_server.clone()));
        let tracker = Arc::new(InstanceTracker::new(root.clone()));
        let (log_shipper, shipper_loop) = LogShipper::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            worker_address.clone(),
            config.log_batch_size,
            config.log_report_interval,
        );

        registry.init_all().await;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            tracker,
            Some(Arc::new(log_shipper.clone()) as Arc<dyn LogSink>),
        ));

        let discovery = Discovery::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            config.bootstrap_server.clone(),
            app_id,
            config.client_version.clone(),
            config.discovery_interval,
        );
        let heartbeat = Heartbeat::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            sampler,
            worker_address.clone(),
            config.heartbeat_interval,
        );
        let reporter = InstanceReporter::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            Arc::new(StorageLister::new(Arc::clone(&store))),
            worker_address.clone(),
            config.report_interval,
        );

        // The shipper outlives the root token until every execution has
        // finished, so logs written while handlers wind down still ship.
        let shipper_token = CancellationToken::new();
        let log_drain = {
            let root = root.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let shipper_token = shipper_token.clone();
            tokio::spawn(async move {
                root.cancelled().await;
                dispatcher.wait_idle().await;
                shipper_token.cancel();
            })
        };

        let loops = vec![
            ("discovery", discovery.spawn(root.child_token())),
            ("heartbeat", heartbeat.spawn(root.child_token())),
            ("reporter", reporter.spawn(root.child_token())),
            ("log_drain", log_drain),
            ("log_shipper", shipper_loop.spawn(shipper_token)),
        ];

        let app = worker_routes(Arc::clone(&dispatcher), &config.route_base);
        let shutdown = root.clone().cancelled_owned();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "Worker HTTP server exited with error");
            }
        });

        info!(
            listen = %local_addr,
            worker_address = %worker_address,
            server = %config.bootstrap_server,
            log_queue = config.log_queue_capacity(),
            "Worker started"
        );

        Ok(Self {
            root,
            local_addr,
            worker_address,
            app_id,
            cache,
            dispatcher,
            log_shipper,
            loops,
            server,
        })
    }

    /// Address the HTTP listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn worker_address(&self) -> &str {
        &self.worker_address
    }

    pub fn app_id(&self) -> i64 {
        self.app_id
    }

    /// Server address currently in use.
    pub fn server_address(&self) -> String {
        self.cache.current()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn log_shipper(&self) -> &LogShipper {
        &self.log_shipper
    }

    /// Enqueue an online log line. `time_ms == 0` means now.
    pub fn log(&self, instance_id: i64, level: LogLevel, content: impl Into<String>, time_ms: i64) {
        let mut entry = LogEntry::new(instance_id, level, content);
        if time_ms != 0 {
            entry.log_time = time_ms;
        }
        self.log_shipper.enqueue(entry);
    }

    /// Cancel the root token and wait for every task to finish.
    pub async fn shutdown(self) {
        info!("Worker shutting down");
        self.root.cancel();
        self.dispatcher.wait_idle().await;

        for (name, handle) in self.loops {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }
        if let Err(e) = self.server.await {
            warn!(error = %e, "HTTP server task ended abnormally");
        }
        info!("Worker stopped");
    }
}
