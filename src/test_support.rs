//! Scripted HTTP responder for exercising the index and host adapters
//!
//! Routes match on method and exact path (query string ignored). Each route
//! serves its responses in order and repeats the last one once exhausted.
//! Unrouted requests get a 404.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

struct Route {
    method: String,
    path: String,
    responses: Vec<StubResponse>,
    served: usize,
}

#[derive(Default)]
struct StubState {
    routes: Vec<Route>,
    requests: Vec<String>,
}

impl StubState {
    fn respond(&mut self, method: &str, target: &str) -> StubResponse {
        self.requests.push(format!("{} {}", method, target));
        let path = target.split('?').next().unwrap_or_default();

        match self
            .routes
            .iter_mut()
            .find(|route| route.method == method && route.path == path)
        {
            Some(route) if !route.responses.is_empty() => {
                let index = route.served.min(route.responses.len() - 1);
                route.served += 1;
                route.responses[index].clone()
            }
            _ => StubResponse::new(404, r#"{"message": "Not Found"}"#),
        }
    }
}

pub struct StubServer {
    url: String,
    state: Arc<Mutex<StubState>>,
}

impl StubServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(StubState::default()));

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, state).await;
                });
            }
        });

        Self { url, state }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn route(&self, method: &str, path: &str, responses: Vec<StubResponse>) {
        self.state.lock().unwrap().routes.push(Route {
            method: method.to_string(),
            path: path.to_string(),
            responses,
            served: 0,
        });
    }

    /// Requests seen so far as "METHOD /path?query"
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

async fn serve(socket: TcpStream, state: Arc<Mutex<StubState>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(socket);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;

    let response = state.lock().unwrap().respond(&method, &target);
    let payload = format!(
        "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        response.status,
        response.body.len(),
        response.body
    );

    let mut socket = reader.into_inner();
    socket.write_all(payload.as_bytes()).await?;
    socket.shutdown().await
}
