use std::{net::SocketAddr, sync::Arc};

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};

#[cfg(feature = "integration")]
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

#[cfg(feature = "integration")]
use crate::HttpClient;

/// Local HTTP endpoint that records JSON bodies and answers with a fixed response.
pub struct WebhookServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl WebhookServer {
    pub async fn start(status: StatusCode, body: &str) -> Self {
        let received = Arc::new(Mutex::new(vec![]));
        let body = body.to_string();

        let sink = received.clone();
        let router = Router::new().route(
            "/hook",
            post(move |Json(payload): Json<Value>| {
                let sink = sink.clone();
                let body = body.clone();
                async move {
                    sink.lock().await.push(payload);
                    (status, body)
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            received,
            shutdown_tx,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Database and HTTP client for live tests.
#[cfg(feature = "integration")]
pub async fn setup() -> (DatabaseConnection, HttpClient) {
    dotenvy::dotenv().ok();
    let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .expect("Database connection failed");

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .build()
        .unwrap();
    (conn, http_client)
}
