//! # HTTP Server
//!
//! Axum server combining the push and observability routers.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::HttpServerConfig;
use super::observability_routes::observability_routes;
use super::push_routes::push_routes;
use crate::push::PushManager;

/// HTTP Server for the push endpoint
pub struct HttpServer {
    config: HttpServerConfig,
    manager: PushManager,
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server serving `manager`
    pub fn new(config: HttpServerConfig, manager: PushManager) -> Self {
        let router = Self::build_router(&config, manager.clone());
        Self {
            config,
            manager,
            router,
        }
    }

    /// Build the combined router with all endpoints
    fn build_router(config: &HttpServerConfig, manager: PushManager) -> Router {
        let cors = if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .merge(observability_routes(manager.clone()))
            .merge(push_routes(manager))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Start the HTTP server and run until the process is interrupted
    pub async fn start(self) -> Result<(), std::io::Error> {
        self.start_with_shutdown(async {
            // Without a signal handler the server simply runs until killed
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Start the HTTP server and stop once `signal` resolves
    ///
    /// The push manager is shut down before in-flight requests drain, so
    /// open sockets receive a close frame instead of hanging on to the server.
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "push server listening");

        let manager = self.manager.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                signal.await;
                info!("shutdown signal received");
                manager.shutdown();
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let server = HttpServer::new(HttpServerConfig::default(), PushManager::default());
        assert_eq!(server.socket_addr(), "0.0.0.0:8090");
    }

    #[test]
    fn test_server_with_custom_port() {
        let config = HttpServerConfig::with_port(8080);
        let server = HttpServer::new(config, PushManager::default());
        assert_eq!(server.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_router_builds_with_origin_list() {
        let config = HttpServerConfig {
            cors_origins: vec!["http://localhost:5173".to_string()],
            ..Default::default()
        };
        let _router = HttpServer::new(config, PushManager::default()).router();
    }

    #[tokio::test]
    async fn test_start_rejects_bad_address() {
        let config = HttpServerConfig {
            host: "not an address".to_string(),
            ..Default::default()
        };
        let server = HttpServer::new(config, PushManager::default());

        let result = server.start_with_shutdown(async {}).await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::InvalidInput);
    }
}
