pub mod catalog_client;
pub mod generation_client;
pub mod interrogate_client;

use crate::{
    builder::{ConditioningSlot, RequestBuilder, SceneState},
    config::ServerConfig,
    error::{Result, SdError},
    models::{GenerationResult, ServerCatalog},
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use std::sync::Arc;

pub use catalog_client::CatalogClient;
pub use generation_client::GenerationClient;
pub use interrogate_client::{InterrogateClient, Interrogator};

pub const USER_AGENT: &str = concat!("sdbridge/", env!("CARGO_PKG_VERSION"));

/// One session against a generation server: HTTP client, configuration and
/// the catalog snapshot taken when the session connected.
#[derive(Clone)]
pub struct SdClient {
    config: Arc<ServerConfig>,
    generation_client: GenerationClient,
    catalog_client: CatalogClient,
    interrogate_client: InterrogateClient,
    catalog: Arc<ServerCatalog>,
}

impl SdClient {
    /// Builds the session without touching the network. The catalog starts empty.
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let http = build_http_client(&config)?;
        let config = Arc::new(config);

        Ok(Self {
            generation_client: GenerationClient::new(http.clone(), config.clone()),
            catalog_client: CatalogClient::new(http.clone(), config.clone()),
            interrogate_client: InterrogateClient::new(http, config.clone()),
            config,
            catalog: Arc::new(ServerCatalog::empty()),
        })
    }

    /// Builds the session and loads the catalog, which stays empty if the
    /// server can't be reached.
    pub async fn connect(config: ServerConfig) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.refresh_catalog().await;
        Ok(client)
    }

    pub fn with_catalog(mut self, catalog: ServerCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub async fn refresh_catalog(&mut self) -> &ServerCatalog {
        self.catalog = Arc::new(self.catalog_client.fetch_or_empty().await);
        &self.catalog
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    pub fn generation(&self) -> &GenerationClient {
        &self.generation_client
    }

    pub fn catalog_client(&self) -> &CatalogClient {
        &self.catalog_client
    }

    pub fn interrogate(&self) -> &InterrogateClient {
        &self.interrogate_client
    }

    pub fn request_builder(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.catalog)
    }

    /// Builds a request from the scene and sends it.
    pub async fn generate(
        &self,
        scene: &SceneState,
        slots: &[ConditioningSlot],
    ) -> Result<GenerationResult> {
        let request = self.request_builder().build(scene, slots)?;

        if !self.catalog.samplers.is_empty() && !self.catalog.has_sampler(&request.sampler_name) {
            log::warn!(
                "Sampler '{}' is not advertised by the server",
                request.sampler_name
            );
        }

        self.generation_client.send(&request).await
    }
}

fn build_http_client(config: &ServerConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(config.timeout)
        .build()
        .map_err(|e| SdError::Config(format!("couldn't build HTTP client: {}", e)))
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| {
        log::error!("The url for your Stable Diffusion server is invalid: {}", url);
        SdError::InvalidAddress(format!("{}: {}", url, e))
    })
}

/// Maps a transport failure onto the connectivity part of [`SdError`].
pub(crate) fn classify_send_error(e: reqwest::Error, url: &str) -> SdError {
    if e.is_timeout() {
        log::error!("The Stable Diffusion server timed out ({})", url);
        SdError::Timeout(format!("no response from {}", url))
    } else if e.is_connect() {
        log::error!("The Stable Diffusion server couldn't be found at {}", url);
        SdError::Unreachable(format!("{}: {}", url, e))
    } else if e.is_builder() {
        log::error!("The url for your Stable Diffusion server is invalid: {}", url);
        SdError::InvalidAddress(format!("{}: {}", url, e))
    } else {
        log::error!("Request to {} failed: {}", url, e);
        SdError::Request(format!("{}: {}", url, e))
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 responder for exercising the clients.

    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Clone)]
    pub struct Route {
        pub method: &'static str,
        pub path: &'static str,
        pub status: u16,
        pub body: String,
        pub delay: Duration,
    }

    impl Route {
        pub fn new(method: &'static str, path: &'static str, status: u16, body: impl Into<String>) -> Self {
            Self {
                method,
                path,
                status,
                body: body.into(),
                delay: Duration::ZERO,
            }
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    pub struct StubServer {
        pub addr: SocketAddr,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubServer {
        pub async fn start(routes: Vec<Route>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let seen = requests.clone();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = routes.clone();
                    let seen = seen.clone();
                    tokio::spawn(async move {
                        handle(stream, routes, seen).await;
                    });
                }
            });

            Self { addr, requests }
        }

        pub fn port(&self) -> u16 {
            self.addr.port()
        }

        /// Raw text of every request received so far.
        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn handle(mut stream: TcpStream, routes: Vec<Route>, seen: Arc<Mutex<Vec<String>>>) {
        let Some(raw) = read_request(&mut stream).await else {
            return;
        };
        let request_line = raw.lines().next().unwrap_or_default().to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        seen.lock().unwrap().push(raw.clone());

        let route = routes
            .iter()
            .find(|route| route.method == method && path.starts_with(route.path));
        let (status, body, delay) = match route {
            Some(route) => (route.status, route.body.clone(), route.delay),
            None => (404, r#"{"detail":"Not Found"}"#.to_string(), Duration::ZERO),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let payload = if method == "HEAD" { "" } else { body.as_str() };
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason(status),
            body.len(),
            payload
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    async fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(header_end) = find_header_end(&buf) {
                let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let content_length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        if buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
    }

    fn find_header_end(buf: &[u8]) -> Option<usize> {
        buf.windows(4).position(|window| window == b"\r\n\r\n")
    }

    fn reason(status: u16) -> &'static str {
        match status {
            200 => "OK",
            404 => "Not Found",
            422 => "Unprocessable Entity",
            500 => "Internal Server Error",
            _ => "Unknown",
        }
    }

    /// A port with nothing listening on it.
    pub async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }
}
