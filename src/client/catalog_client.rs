use super::{classify_send_error, parse_url};
use crate::{
    config::ServerConfig,
    error::{Result, SdError},
    models::{
        ModelListResponse, ModuleListResponse, NamedEntry, ServerCatalog, SliderDescriptor,
    },
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only queries describing what the server offers.
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    config: Arc<ServerConfig>,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, config: Arc<ServerConfig>) -> Self {
        Self { http, config }
    }

    /// HEAD on the server root. Any failure counts as "not there".
    pub async fn ping(&self) -> bool {
        let url = self.config.base_url();
        match self.http.head(&url).send().await {
            Ok(response) => {
                let ok = response.status() == StatusCode::OK;
                if !ok {
                    log::debug!("Ping {} answered HTTP {}", url, response.status());
                }
                ok
            }
            Err(e) => {
                log::debug!("Ping {} failed: {}", url, e);
                false
            }
        }
    }

    pub async fn module_list(&self) -> Result<Vec<String>> {
        Ok(self.module_listing().await?.module_list)
    }

    /// Slider descriptors per module, with null entries dropped.
    pub async fn module_details(&self) -> Result<BTreeMap<String, Vec<SliderDescriptor>>> {
        Ok(details_from(self.module_listing().await?))
    }

    pub async fn model_list(&self) -> Result<Vec<String>> {
        let url = format!("{}model_list", self.config.controlnet_host());
        Ok(self.get_json::<ModelListResponse>(&url).await?.model_list)
    }

    pub async fn samplers(&self) -> Result<Vec<String>> {
        let url = format!("{}samplers", self.config.sd_host());
        self.names(&url).await
    }

    pub async fn upscalers(&self) -> Result<Vec<String>> {
        let url = format!("{}upscalers", self.config.sd_host());
        self.names(&url).await
    }

    /// Loads the whole catalog, querying the endpoints concurrently.
    /// Any failing endpoint fails the fetch.
    pub async fn fetch(&self) -> Result<ServerCatalog> {
        let _timer = crate::logger::timer("catalog fetch");
        let (listing, models, samplers, upscalers) = futures::try_join!(
            self.module_listing(),
            self.model_list(),
            self.samplers(),
            self.upscalers()
        )?;

        Ok(assemble(listing, models, samplers, upscalers))
    }

    /// Like [`fetch`](Self::fetch), but each list falls back to empty on its
    /// own. A server without the ControlNet extension still yields samplers
    /// and upscalers; an unreachable one yields an empty catalog.
    pub async fn fetch_or_empty(&self) -> ServerCatalog {
        if !self.ping().await {
            log::warn!(
                "⚠️  Stable Diffusion server not reachable at {}, starting with an empty catalog",
                self.config.base_url()
            );
            return ServerCatalog::empty();
        }

        let _timer = crate::logger::timer("catalog fetch");
        let (listing, models, samplers, upscalers) = futures::join!(
            self.module_listing(),
            self.model_list(),
            self.samplers(),
            self.upscalers()
        );

        assemble(
            or_empty("ControlNet modules", listing),
            or_empty("ControlNet models", models),
            or_empty("samplers", samplers),
            or_empty("upscalers", upscalers),
        )
    }

    async fn module_listing(&self) -> Result<ModuleListResponse> {
        let url = format!("{}module_list?alias_names=false", self.config.controlnet_host());
        self.get_json(&url).await
    }

    async fn names(&self, url: &str) -> Result<Vec<String>> {
        let entries: Vec<NamedEntry> = self.get_json(url).await?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let url = parse_url(url)?;
        log::debug!("🔎 GET {}", url);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_send_error(e, url.as_str()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, url.as_str()))?;

        if !status.is_success() {
            log::error!("GET {} answered HTTP {}: {}", url, status, body);
            return Err(SdError::Server {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| SdError::Response(format!("unexpected body from {}: {}", url, e)))
    }
}

fn or_empty<T: Default>(what: &str, result: Result<T>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("⚠️  Couldn't load {}, leaving the list empty: {}", what, e);
        T::default()
    })
}

fn assemble(
    listing: ModuleListResponse,
    models: Vec<String>,
    samplers: Vec<String>,
    upscalers: Vec<String>,
) -> ServerCatalog {
    let catalog = ServerCatalog {
        modules: listing.module_list.clone(),
        models,
        samplers,
        upscalers,
        module_details: details_from(listing),
    };
    log::info!(
        "📚 Catalog loaded: {} modules, {} models, {} samplers, {} upscalers",
        catalog.modules.len(),
        catalog.models.len(),
        catalog.samplers.len(),
        catalog.upscalers.len()
    );
    catalog
}

fn details_from(listing: ModuleListResponse) -> BTreeMap<String, Vec<SliderDescriptor>> {
    listing
        .module_detail
        .into_iter()
        .map(|(name, detail)| (name, detail.descriptors()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::{closed_port, Route, StubServer};
    use crate::models::ConditioningMode;
    use serde_json::json;

    fn client(port: u16) -> CatalogClient {
        let config = ServerConfig::new().with_address("127.0.0.1").with_port(port);
        CatalogClient::new(reqwest::Client::new(), Arc::new(config))
    }

    fn catalog_routes() -> Vec<Route> {
        vec![
            Route::new("HEAD", "/", 200, ""),
            Route::new(
                "GET",
                "/controlnet/module_list",
                200,
                json!({
                    "module_list": ["none", "canny", "depth"],
                    "module_detail": {
                        "canny": {
                            "sliders": [
                                {"name": "Preprocessor Resolution", "value": 512, "min": 64, "max": 2048},
                                {"name": "Canny Low Threshold", "value": 100, "min": 1, "max": 255},
                                null
                            ]
                        },
                        "depth": { "sliders": [] }
                    }
                })
                .to_string(),
            ),
            Route::new(
                "GET",
                "/controlnet/model_list",
                200,
                json!({ "model_list": ["control_v11p_sd15_canny [d14c016b]"] }).to_string(),
            ),
            Route::new(
                "GET",
                "/sdapi/v1/samplers",
                200,
                json!([{ "name": "Euler a", "aliases": ["k_euler_a"] }, { "name": "DDIM" }]).to_string(),
            ),
            Route::new(
                "GET",
                "/sdapi/v1/upscalers",
                200,
                json!([{ "name": "None" }, { "name": "Lanczos" }]).to_string(),
            ),
        ]
    }

    #[tokio::test]
    async fn ping_reports_reachability() {
        let server = StubServer::start(vec![Route::new("HEAD", "/", 200, "")]).await;
        assert!(client(server.port()).ping().await);
        assert!(!client(closed_port().await).ping().await);
    }

    #[tokio::test]
    async fn module_list_asks_for_canonical_names() {
        let server = StubServer::start(catalog_routes()).await;
        let modules = client(server.port()).module_list().await.unwrap();
        assert_eq!(modules, vec!["none", "canny", "depth"]);
        assert!(server.requests()[0].starts_with("GET /controlnet/module_list?alias_names=false "));
    }

    #[tokio::test]
    async fn fetch_assembles_full_catalog() {
        let server = StubServer::start(catalog_routes()).await;
        let catalog = client(server.port()).fetch().await.unwrap();

        assert_eq!(catalog.models, vec!["control_v11p_sd15_canny [d14c016b]"]);
        assert_eq!(catalog.samplers, vec!["Euler a", "DDIM"]);
        assert_eq!(catalog.upscalers, vec!["None", "Lanczos"]);
        assert!(catalog.has_sampler("DDIM"));

        let canny = catalog.sliders_for(ConditioningMode::Canny);
        assert_eq!(canny.len(), 2);
        assert_eq!(canny[1].key(), "canny_low_threshold");
        assert!(catalog.sliders_for(ConditioningMode::Depth).is_empty());
    }

    #[tokio::test]
    async fn failing_endpoint_fails_fetch_but_only_empties_its_own_list() {
        let mut routes = catalog_routes();
        routes.retain(|route| route.path != "/sdapi/v1/upscalers");
        routes.push(Route::new("GET", "/sdapi/v1/upscalers", 500, "boom"));
        let server = StubServer::start(routes).await;
        let client = client(server.port());

        assert!(matches!(
            client.fetch().await,
            Err(SdError::Server { status: 500, .. })
        ));

        let catalog = client.fetch_or_empty().await;
        assert!(catalog.upscalers.is_empty());
        assert_eq!(catalog.samplers, vec!["Euler a", "DDIM"]);
        assert_eq!(catalog.modules, vec!["none", "canny", "depth"]);
        assert_eq!(catalog.models.len(), 1);
    }

    #[tokio::test]
    async fn server_without_controlnet_still_lists_samplers_and_upscalers() {
        let mut routes = catalog_routes();
        routes.retain(|route| !route.path.starts_with("/controlnet/"));
        let server = StubServer::start(routes).await;

        let catalog = client(server.port()).fetch_or_empty().await;
        assert_eq!(catalog.samplers, vec!["Euler a", "DDIM"]);
        assert_eq!(catalog.upscalers, vec!["None", "Lanczos"]);
        assert!(catalog.modules.is_empty());
        assert!(catalog.models.is_empty());
        assert!(catalog.module_details.is_empty());
        assert!(!catalog.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_yields_empty_catalog() {
        let catalog = client(closed_port().await).fetch_or_empty().await;
        assert_eq!(catalog, ServerCatalog::empty());
    }

    #[tokio::test]
    async fn malformed_body_is_a_response_error() {
        let server = StubServer::start(vec![Route::new(
            "GET",
            "/controlnet/model_list",
            200,
            "<html>model list</html>",
        )])
        .await;
        assert!(matches!(
            client(server.port()).model_list().await,
            Err(SdError::Response(_))
        ));
    }
}
