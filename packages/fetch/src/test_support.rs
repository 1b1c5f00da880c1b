//! Shared fixtures for the fetch tests: a scripted endpoint client and a
//! throwaway HTTP responder.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::encoder::EncodedQuery;
use crate::endpoint::{CallOutcome, EndpointClient};

type Script = Box<dyn Fn(&EncodedQuery) -> CallOutcome + Send + Sync>;

/// [`EndpointClient`] answering from a closure and counting calls.
pub struct ScriptedClient {
    calls: AtomicUsize,
    script: Script,
}

impl ScriptedClient {
    pub fn new(script: impl Fn(&EncodedQuery) -> CallOutcome + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Box::new(script),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EndpointClient for ScriptedClient {
    async fn call(&self, query: &EncodedQuery) -> CallOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(query)
    }
}

/// Bounding box `(west, south, east, north)` of a Police `poly` parameter.
pub fn poly_bounds(query: &EncodedQuery) -> (f64, f64, f64, f64) {
    let poly = query.param("poly").expect("query has no poly parameter");
    let mut bounds = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for pair in poly.split(':') {
        let (lat, lng) = pair.split_once(',').expect("malformed poly pair");
        let lat: f64 = lat.parse().unwrap();
        let lng: f64 = lng.parse().unwrap();
        bounds.0 = bounds.0.min(lng);
        bounds.1 = bounds.1.min(lat);
        bounds.2 = bounds.2.max(lng);
        bounds.3 = bounds.3.max(lat);
    }
    bounds
}

/// A Police-style JSON array with one bicycle theft per id.
pub fn police_crimes(ids: &[u64], month: &str) -> String {
    let crimes: Vec<_> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "category": "bicycle-theft",
                "id": id,
                "month": month,
                "location": {"latitude": "51.5", "longitude": "-0.1",
                             "street": {"id": 1000 + id}}
            })
        })
        .collect();
    serde_json::to_string(&crimes).unwrap()
}

async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                return;
            }
        }
    }
}

/// Serves exactly one HTTP response and returns the server's URL.
pub async fn serve_once(status: u16, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut stream).await;
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    });

    format!("http://{addr}/")
}

/// Accepts connections but never answers, so clients hit their timeout.
pub async fn hanging_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("http://{addr}/")
}
