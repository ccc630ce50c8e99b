use anyhow::{Context, Result};
use std::{future::Future, net::SocketAddr};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    codegen::http::{HeaderValue, Request},
    transport::Server,
};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{MakeSpan, TraceLayer},
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

use super::{pb::auth_service_server::AuthServiceServer, AuthApi};

/// Request ids for calls that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUlid;

impl MakeRequestId for MakeRequestUlid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Ulid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}

// span
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcSpan;

impl<B> MakeSpan<B> for GrpcSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.uri().path();
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .unwrap_or("none");

        debug_span!("grpc-request", method, request_id)
    }
}

/// Bind `addr` and serve `AuthService` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the transport fails.
pub async fn serve<F>(addr: SocketAddr, api: AuthApi, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", listener.local_addr()?);

    serve_listener(listener, api, shutdown).await
}

/// Serve `AuthService` on an already bound listener.
///
/// # Errors
/// Returns an error if the transport fails.
pub async fn serve_listener<F>(listener: TcpListener, api: AuthApi, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let layer = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUlid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_grpc().make_span_with(GrpcSpan))
        .into_inner();

    Server::builder()
        .layer(layer)
        .add_service(AuthServiceServer::new(api))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .context("gRPC server failed")?;

    info!("Gracefully shutdown");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_ulids() {
        let request = Request::new(());
        let id = MakeRequestUlid.make_request_id(&request);
        let value = id
            .as_ref()
            .and_then(|id| id.header_value().to_str().ok())
            .map(str::to_string);
        assert!(value.is_some_and(|value| value.parse::<Ulid>().is_ok()));
    }
}
