#![allow(dead_code)]
mod assistant;
mod db_core;
mod email;
mod error;
mod model;
mod notify;
mod prompt;
mod rate_limiters;
mod request_tracing;
mod retry;
mod routes;
mod rules;
mod server_config;
mod state;
#[cfg(test)]
mod testing;
mod util;

use std::{env, future::Future, net::SocketAddr, pin::Pin, time::Duration};

use axum::{extract::FromRef, Router};
use db_core::prelude::*;
use mimalloc::MiMalloc;
use rate_limiters::RateLimiters;
use routes::AppRouter;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use server_config::cfg;
use state::Services;
use tokio::{signal, task::JoinHandle};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub http_client: HttpClient,
    pub conn: DatabaseConnection,
    pub rate_limiters: RateLimiters,
    pub services: Services,
}

impl ServerState {
    pub fn new(http_client: HttpClient, conn: DatabaseConnection) -> Self {
        let rate_limiters = RateLimiters::from_env();
        let services = Services::from_config(http_client.clone(), conn.clone(), rate_limiters.clone());
        Self {
            http_client,
            conn,
            rate_limiters,
            services,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let db_url = env::var("DATABASE_URL").expect("DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .expect("Database connection failed");

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    let state = ServerState::new(http_client, conn);
    let router = AppRouter::create(state.clone());

    let mut scheduler = JobScheduler::new()
        .await
        .expect("Failed to create scheduler");

    {
        let state_clone = state.clone();
        // Deferred actions whose time has come
        scheduler
            .add(Job::new_repeated_async(
                Duration::from_secs(cfg.engine.deferred_poll_secs),
                move |uuid, l| run_due_actions_job(uuid, l, state_clone.clone()),
            )?)
            .await?;

        let state_clone = state.clone();
        // Every 6 hours, renew watches that expire within a day
        scheduler
            .add(Job::new_async("0 0 */6 * * *", move |uuid, mut l| {
                let state = state_clone.clone();
                Box::pin(async move {
                    tracing::info!("Running watch renewal job {}", uuid);
                    match state::tasks::renew_expiring_watches(state).await {
                        Ok(renewed) => {
                            tracing::info!("Watch renewal job {} renewed {} watches", uuid, renewed);
                        }
                        Err(e) => {
                            tracing::error!("Failed to renew watches: {:?}", e);
                        }
                    }

                    let next_tick = l.next_tick_for_job(uuid).await;
                    if let Ok(Some(ts)) = next_tick {
                        tracing::info!("Next time for watch renewal job is {:?}", ts)
                    }
                })
            })?)
            .await?;
    }

    scheduler.set_shutdown_handler(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Shutting down scheduler");
        })
    }));

    println!("Starting scheduler...");
    match scheduler.start().await {
        Ok(_) => {
            println!("-------- SCHEDULER STARTED --------");
        }
        Err(e) => {
            println!("Failed to start scheduler: {:?}", e);
        }
    }

    if let Err(e) = run_server(router, scheduler).await {
        tracing::error!("Server task failed: {:?}", e);
    }

    Ok(())
}

async fn shutdown_signal(mut scheduler: JobScheduler) {
    if env::var("NO_SHUTDOWN").unwrap_or("false".to_string()) == "true" {
        return;
    }

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {:?}", e);
    }
    println!("Cleanups done, shutting down");
}

fn run_server(router: Router, scheduler: JobScheduler) -> JoinHandle<()> {
    tokio::spawn(async {
        let port = env::var("PORT").unwrap_or("5006".to_string());
        tracing::info!("Inbox server running on http://0.0.0.0:{}", port);
        println!("{}", *cfg);

        let addr = SocketAddr::from(([0, 0, 0, 0], port.parse::<u16>().unwrap()));
        tracing::debug!("listening on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(scheduler))
        .await
        .unwrap();
    })
}

fn run_due_actions_job(
    uuid: Uuid,
    mut l: JobScheduler,
    state: ServerState,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
    Box::pin(async move {
        match state::tasks::run_due_actions(state).await {
            Ok(0) => {}
            Ok(ran) => {
                tracing::info!("Deferred action job {} ran {} actions", uuid, ran);
            }
            Err(e) => {
                tracing::error!("Deferred action job failed: {:?}", e);
            }
        }

        let next_tick = l.next_tick_for_job(uuid).await;
        if let Ok(Some(ts)) = next_tick {
            tracing::debug!("Next time for deferred action job is {:?}", ts)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    #[cfg(feature = "integration")]
    use tokio::net::TcpListener;

    pub struct TestServer {
        pub addr: SocketAddr,
        pub state: ServerState,
        shutdown_tx: tokio::sync::oneshot::Sender<()>,
    }

    impl TestServer {
        pub fn url(&self) -> String {
            format!("http://{}", self.addr)
        }

        pub async fn shutdown(self) {
            let _ = self.shutdown_tx.send(());
        }
    }

    #[cfg(feature = "integration")]
    pub async fn setup() -> anyhow::Result<TestServer> {
        let (conn, http_client) = testing::common::setup().await;
        let state = ServerState::new(http_client, conn);
        let router = AppRouter::create(state.clone());

        // Bind to port 0 to get a random available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .unwrap();
        });

        Ok(TestServer {
            addr,
            state,
            shutdown_tx,
        })
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_server_starts() {
        let server = setup().await.expect("Failed to setup test server");
        let body = reqwest::get(server.url()).await.unwrap().text().await.unwrap();
        assert_eq!(body, "Inbox server");
        server.shutdown().await;
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_unknown_account_watch_status() {
        let server = setup().await.expect("Failed to setup test server");
        let response = reqwest::get(format!(
            "{}/user/email-account/does-not-exist/watch-status",
            server.url()
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        server.shutdown().await;
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_outlook_validation_echo() {
        let server = setup().await.expect("Failed to setup test server");
        let response = reqwest::Client::new()
            .post(format!(
                "{}/webhooks/outlook?validationToken=abc%20123",
                server.url()
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "abc 123");
        server.shutdown().await;
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn test_tool_definitions() {
        let server = setup().await.expect("Failed to setup test server");
        let tools: serde_json::Value = reqwest::get(format!("{}/assistant/tools", server.url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tools.as_array().map(Vec::len), Some(5));
        server.shutdown().await;
    }
}
