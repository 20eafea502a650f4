use anyhow::Result;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, future::Future, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};

pub(crate) type Body = Full<Bytes>;

/// Serves HTTP/1 connections from `listener` until shutdown is signaled.
///
/// Connections that are in flight when shutdown begins are left to finish on
/// their own.
pub(crate) async fn serve<F, Fut>(
    name: &'static str,
    listener: TcpListener,
    drain: drain::Watch,
    handle: F,
) -> Result<()>
where
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "{name} server listening");

    let handle = Arc::new(handle);
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);
    loop {
        let (stream, client) = tokio::select! {
            release = &mut shutdown => {
                debug!(%addr, "{name} server stopped");
                drop(release);
                return Ok(());
            }
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        let handle = handle.clone();
        tokio::spawn(
            async move {
                let svc = service_fn(move |req| {
                    let rsp = (*handle)(req);
                    async move { Ok::<_, Infallible>(rsp.await) }
                });
                if let Err(error) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await
                {
                    debug!(%error, "Connection closed");
                }
            }
            .instrument(info_span!("conn", %client)),
        );
    }
}

pub(crate) fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Body> {
    with_content_type(status, "text/plain", body)
}

pub(crate) fn empty(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = status;
    rsp
}

fn with_content_type(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Body> {
    let mut rsp = Response::new(Full::new(body.into()));
    *rsp.status_mut() = status;
    rsp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    rsp
}
