//! Shared fixtures for the async tests: a minimal local HTTP server that
//! answers every request with a canned status and body.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Serve `body` with `status` for every request; returns the base URL.
pub(crate) async fn spawn_canned_server(status: u16, body: &'static str) -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind canned server");
	let addr = listener.local_addr().expect("local addr");

	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else { break };
			tokio::spawn(async move {
				let service = service_fn(move |_req: Request<Incoming>| async move {
					let response = Response::builder()
						.status(StatusCode::from_u16(status).expect("valid status"))
						.header("Content-Type", "application/json")
						.body(Full::new(Bytes::from_static(body.as_bytes())))
						.expect("build response");
					Ok::<_, hyper::Error>(response)
				});
				let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
			});
		}
	});

	format!("http://{addr}")
}
