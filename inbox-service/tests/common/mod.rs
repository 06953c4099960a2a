use inbox_service::config::{
    DispatchConfig, FcmConfig, InboxConfig, InboxPageConfig, MongoConfig, SmtpConfig,
    StoreBackend,
};
use inbox_service::services::{
    ChannelRegistry, InAppChannel, InMemoryNotificationStore, MockEmailChannel, MockPushChannel,
};
use inbox_service::{AppState, Application};
use service_core::config::Config as CoreConfig;
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: InMemoryNotificationStore,
    pub client: reqwest::Client,
}

pub fn test_config(store: StoreBackend) -> InboxConfig {
    InboxConfig {
        // Use random port for testing (port 0)
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        store,
        mongodb: MongoConfig {
            uri: std::env::var("TEST_MONGODB_URI")
                .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            database: format!("inbox_test_{}", uuid::Uuid::new_v4()),
        },
        smtp: SmtpConfig {
            host: "smtp.test.local".to_string(),
            port: 587,
            user: "test".to_string(),
            password: "test".to_string(),
            from_email: "test@example.com".to_string(),
            from_name: "Test Service".to_string(),
            timeout_secs: 5,
            enabled: false, // Use mock
        },
        fcm: FcmConfig {
            project_id: "test-project".to_string(),
            access_token: "test-token".to_string(),
            api_base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            enabled: false, // Use mock
        },
        dispatch: DispatchConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            send_timeout_ms: 1_000,
        },
        inbox: InboxPageConfig {
            default_page_size: 20,
        },
    }
}

pub fn mock_channels() -> ChannelRegistry {
    ChannelRegistry::new()
        .register(Arc::new(MockEmailChannel::new()))
        .register(Arc::new(MockPushChannel::new()))
        .register(Arc::new(InAppChannel::new()))
}

impl TestApp {
    /// In-memory store with mock channels.
    pub async fn spawn() -> Self {
        Self::spawn_with_channels(mock_channels()).await
    }

    pub async fn spawn_with_channels(channels: ChannelRegistry) -> Self {
        let store = InMemoryNotificationStore::new();
        let state = AppState::new(
            test_config(StoreBackend::Memory),
            Arc::new(store.clone()),
            channels,
        );

        let app = Application::with_state(state)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            client,
        }
    }

    pub async fn dispatch(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/notifications", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Dispatch and return the new id, asserting 201.
    pub async fn dispatch_ok(&self, body: serde_json::Value) -> String {
        let response = self.dispatch(body).await;
        assert_eq!(response.status().as_u16(), 201);
        let body: serde_json::Value = response.json().await.expect("Failed to parse response");
        body["id"]
            .as_str()
            .expect("response has no id")
            .to_string()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put(&self, path: &str) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
