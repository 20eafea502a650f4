use crate::http::{self, Body};
use anyhow::Result;
use ecnet_controller_core::Probes;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tokio::net::TcpListener;

const READY_PATH: &str = "/health/ready";
const ALIVE_PATH: &str = "/health/alive";

#[derive(Copy, Clone, Debug)]
enum Probe {
    Ready,
    Alive,
}

/// Serves the readiness and liveness probes. A probe passes only when every
/// component passes it.
pub(crate) async fn serve(
    listener: TcpListener,
    probes: Vec<Arc<dyn Probes>>,
    drain: drain::Watch,
) -> Result<()> {
    let probes: Arc<[Arc<dyn Probes>]> = probes.into();
    http::serve("health", listener, drain, move |req| {
        futures::future::ready(handle(&probes, &req))
    })
    .await
}

fn handle<B>(probes: &[Arc<dyn Probes>], req: &Request<B>) -> Response<Body> {
    if !matches!(*req.method(), Method::GET | Method::HEAD) {
        return http::empty(StatusCode::METHOD_NOT_ALLOWED);
    }
    match req.uri().path() {
        READY_PATH => check(probes, Probe::Ready),
        ALIVE_PATH => check(probes, Probe::Alive),
        _ => http::empty(StatusCode::NOT_FOUND),
    }
}

fn check(probes: &[Arc<dyn Probes>], probe: Probe) -> Response<Body> {
    for p in probes {
        let ok = match probe {
            Probe::Ready => p.readiness(),
            Probe::Alive => p.liveness(),
        };
        if !ok {
            let msg = match probe {
                Probe::Ready => format!("Readiness probe for {} indicates it is not ready", p.id()),
                Probe::Alive => format!("Liveness probe for {} indicates it is not alive", p.id()),
            };
            tracing::warn!("{msg}");
            return http::text(StatusCode::SERVICE_UNAVAILABLE, msg);
        }
    }

    match probe {
        Probe::Ready => http::text(StatusCode::OK, "Service is ready"),
        Probe::Alive => http::text(StatusCode::OK, "Service is alive"),
    }
}
