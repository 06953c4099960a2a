//! Application startup and lifecycle management.

use crate::config::{InboxConfig, StoreBackend};
use crate::handlers;
use crate::services::{
    ChannelRegistry, DeliveryChannel, DispatchCoordinator, FcmPushChannel, InAppChannel,
    InMemoryNotificationStore, InboxService, MockEmailChannel, MockPushChannel,
    MongoNotificationStore, NotificationStore, SmtpEmailChannel,
};
use axum::{
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: InboxConfig,
    pub store: Arc<dyn NotificationStore>,
    pub dispatcher: DispatchCoordinator,
    pub inbox: InboxService,
}

impl AppState {
    pub fn new(
        config: InboxConfig,
        store: Arc<dyn NotificationStore>,
        channels: ChannelRegistry,
    ) -> Self {
        let dispatcher = DispatchCoordinator::new(
            store.clone(),
            channels,
            config.dispatch.retry_config(),
            config.dispatch.send_timeout(),
        );
        let inbox = InboxService::new(store.clone());

        Self {
            config,
            store,
            dispatcher,
            inbox,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/notifications",
            post(handlers::create_notification).get(handlers::list_notifications),
        )
        // Static segment; takes priority over `:id`.
        .route("/notifications/read-all", put(handlers::mark_all_read))
        .route(
            "/notifications/:id",
            get(handlers::get_notification).delete(handlers::delete_notification),
        )
        .route("/notifications/:id/read", put(handlers::mark_read))
        .route("/email-notifications", post(handlers::send_email))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
}

async fn build_store(config: &InboxConfig) -> Result<Arc<dyn NotificationStore>, AppError> {
    match config.store {
        StoreBackend::Mongo => {
            let store = MongoNotificationStore::connect(&config.mongodb.uri, &config.mongodb.database)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to connect to MongoDB: {}", e);
                    e
                })?;

            store.initialize_indexes().await.map_err(|e| {
                tracing::error!("Failed to initialize database indexes: {}", e);
                e
            })?;

            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory notification store; data will not survive a restart");
            Ok(Arc::new(InMemoryNotificationStore::new()))
        }
    }
}

fn build_channels(config: &InboxConfig) -> ChannelRegistry {
    let email: Arc<dyn DeliveryChannel> = if config.smtp.enabled {
        match SmtpEmailChannel::new(config.smtp.clone()) {
            Ok(channel) => {
                tracing::info!("SMTP email channel initialized");
                Arc::new(channel)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize SMTP channel: {}. Using mock.", e);
                Arc::new(MockEmailChannel::new())
            }
        }
    } else {
        tracing::info!("SMTP disabled, using mock email channel");
        Arc::new(MockEmailChannel::new())
    };

    let push: Arc<dyn DeliveryChannel> = if config.fcm.enabled {
        match FcmPushChannel::new(config.fcm.clone()) {
            Ok(channel) => {
                tracing::info!("FCM push channel initialized");
                Arc::new(channel)
            }
            Err(e) => {
                tracing::warn!("Failed to initialize FCM channel: {}. Using mock.", e);
                Arc::new(MockPushChannel::new())
            }
        }
    } else {
        tracing::info!("FCM disabled, using mock push channel");
        Arc::new(MockPushChannel::new())
    };

    ChannelRegistry::new()
        .register(email)
        .register(push)
        .register(Arc::new(InAppChannel::new()))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application from configuration: store backend, delivery
    /// channels and a bound listener (port 0 picks a free port).
    pub async fn build(config: InboxConfig) -> Result<Self, AppError> {
        let store = build_store(&config).await?;
        let channels = build_channels(&config);

        Self::with_state(AppState::new(config, store, channels)).await
    }

    /// Bind a listener for an already assembled state.
    pub async fn with_state(state: AppState) -> Result<Self, AppError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Inbox service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> Arc<dyn NotificationStore> {
        self.state.store.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
