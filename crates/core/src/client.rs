//! Remote Session Client
//!
//! Talks to the simulation service over HTTP: the `simulate` round trip that
//! produces narrative text, the image side channel keyed by a cue, and the
//! document upload that precedes a session.

use crate::models::{
    ImageRequest, ImageResponse, NarrativeResponse, SimulateRequest, UploadReceipt,
};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::Path;
use tracing::{info, instrument, warn};
use url::Url;

#[cfg(test)]
use mockall::automock;

/// Narrative shown when the simulation service cannot be reached.
pub const SEVERED_NARRATIVE: &str = "⚠️ **CONNECTION ERROR**: NEURAL LINK SEVERED.";

/// Header some tunnelling proxies require before they forward API traffic.
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Service answered {status} for {route}")]
    Status {
        route: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("Could not read document: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid tunnel token: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error("Malformed image payload: {0}")]
    MalformedImage(String),
}

/// Image content returned for a cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    /// Decoded bytes from a `data:` URL.
    Inline { mime: String, bytes: Vec<u8> },
    /// A location the image can be fetched from.
    Remote(String),
}

impl ImageData {
    /// Interprets the `image` field of a `/generate_image` response.
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let raw = raw.trim();
        let Some(rest) = raw.strip_prefix("data:") else {
            if raw.is_empty() {
                return Err(ClientError::MalformedImage("empty image field".into()));
            }
            return Ok(ImageData::Remote(raw.to_string()));
        };

        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| ClientError::MalformedImage("data URL without payload".into()))?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or_else(|| ClientError::MalformedImage(format!("unsupported encoding '{meta}'")))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ClientError::MalformedImage(e.to_string()))?;
        Ok(ImageData::Inline {
            mime: mime.to_string(),
            bytes,
        })
    }

    /// File extension matching the image type.
    pub fn extension(&self) -> &str {
        match self {
            ImageData::Inline { mime, .. } => match mime.as_str() {
                "image/jpeg" => "jpg",
                "image/gif" => "gif",
                "image/webp" => "webp",
                _ => "png",
            },
            ImageData::Remote(_) => "url",
        }
    }
}

/// What a `simulate` exchange produced for the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulateOutcome {
    /// The raw narrative returned by the service.
    Delivered(String),
    /// The service could not be reached or refused the request.
    Severed,
}

impl SimulateOutcome {
    pub fn text(&self) -> &str {
        match self {
            SimulateOutcome::Delivered(text) => text,
            SimulateOutcome::Severed => SEVERED_NARRATIVE,
        }
    }

    fn from_result(route: &str, result: Result<String, ClientError>) -> Self {
        match result {
            Ok(text) => SimulateOutcome::Delivered(text),
            Err(e) => {
                warn!(route, error = %e, "Simulation link severed");
                SimulateOutcome::Severed
            }
        }
    }
}

/// The request/response boundary to the simulation service.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SimulationApi: Send + Sync {
    /// `POST /simulate`: returns the raw narrative for `request`.
    async fn simulate(&self, request: &SimulateRequest) -> Result<String, ClientError>;

    /// `POST /start-simulation`: returns an opening narrative.
    async fn start_simulation(&self) -> Result<String, ClientError>;

    /// `POST /generate_image`: resolves an image for a cue.
    async fn generate_image(&self, prompt: &str) -> Result<ImageData, ClientError>;
}

/// Runs `simulate` and maps any failure to [`SimulateOutcome::Severed`].
pub async fn simulate(api: &dyn SimulationApi, request: &SimulateRequest) -> SimulateOutcome {
    SimulateOutcome::from_result("/simulate", api.simulate(request).await)
}

/// Runs `start_simulation` and maps any failure to [`SimulateOutcome::Severed`].
pub async fn start_simulation(api: &dyn SimulationApi) -> SimulateOutcome {
    SimulateOutcome::from_result("/start-simulation", api.start_simulation().await)
}

/// `reqwest` implementation of [`SimulationApi`].
#[derive(Clone)]
pub struct HttpSimulationClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpSimulationClient {
    /// Creates a client for the service rooted at `base_url`.
    ///
    /// When `tunnel_token` is set it is sent with every request in the
    /// [`TUNNEL_BYPASS_HEADER`] header.
    pub fn new(base_url: &str, tunnel_token: Option<&str>) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = tunnel_token {
            headers.insert(
                HeaderName::from_static(TUNNEL_BYPASS_HEADER),
                HeaderValue::from_str(token)?,
            );
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn route(&self, route: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(route)?)
    }

    async fn post_json<B, R>(&self, route: &'static str, body: Option<&B>) -> Result<R, ClientError>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut request = self.http.post(self.route(route)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { route, status });
        }
        Ok(response.json::<R>().await?)
    }

    /// `POST /upload`: sends a document as the multipart `file` field.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn upload_document(&self, path: &Path) -> Result<UploadReceipt, ClientError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );
        let response = self
            .http
            .post(self.route("upload")?)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                route: "upload",
                status,
            });
        }
        let receipt: UploadReceipt = response.json().await?;
        info!(status = %receipt.status, char_count = ?receipt.char_count, "Document uploaded");
        Ok(receipt)
    }
}

#[async_trait]
impl SimulationApi for HttpSimulationClient {
    #[instrument(skip_all, fields(action = %request.action, language = %request.language, turns = request.history.len()))]
    async fn simulate(&self, request: &SimulateRequest) -> Result<String, ClientError> {
        let body: NarrativeResponse = self.post_json("simulate", Some(request)).await?;
        Ok(body.response)
    }

    #[instrument(skip_all)]
    async fn start_simulation(&self) -> Result<String, ClientError> {
        let body: NarrativeResponse = self.post_json::<(), _>("start-simulation", None).await?;
        Ok(body.response)
    }

    #[instrument(skip(self))]
    async fn generate_image(&self, prompt: &str) -> Result<ImageData, ClientError> {
        let request = ImageRequest {
            prompt: prompt.to_string(),
        };
        let body: ImageResponse = self.post_json("generate_image", Some(&request)).await?;
        ImageData::parse(&body.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, Turn};
    use axum::{
        Json, Router,
        extract::{Multipart, State},
        http::{HeaderMap as AxumHeaders, StatusCode},
        routing::post,
    };
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        bodies: Arc<Mutex<Vec<Value>>>,
        tunnel: Arc<Mutex<Option<String>>>,
    }

    async fn simulate_route(
        State(seen): State<Seen>,
        headers: AxumHeaders,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        *seen.tunnel.lock().unwrap() = headers
            .get(TUNNEL_BYPASS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.bodies.lock().unwrap().push(body);
        Json(json!({"response": "Trainer: Correct, the valve is now open ✅"}))
    }

    async fn image_route(Json(body): Json<Value>) -> Json<Value> {
        let image = if body["prompt"] == "pressure gauge" {
            "data:image/png;base64,iVBORw0K".to_string()
        } else {
            format!("https://images.example/{}", body["prompt"].as_str().unwrap_or(""))
        };
        Json(json!({ "image": image }))
    }

    async fn upload_route(mut multipart: Multipart) -> Json<Value> {
        let mut size = 0;
        while let Some(field) = multipart.next_field().await.unwrap() {
            assert_eq!(field.name(), Some("file"));
            assert_eq!(field.file_name(), Some("manual.pdf"));
            size += field.bytes().await.unwrap().len();
        }
        Json(json!({"status": "success", "char_count": size}))
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> SimulateRequest {
        SimulateRequest {
            action: "open valve".to_string(),
            history: vec![Turn::user("inspect pump")],
            language: Language::Spanish,
        }
    }

    #[tokio::test]
    async fn test_simulate_posts_action_history_and_language() {
        let seen = Seen::default();
        let base = serve(
            Router::new()
                .route("/simulate", post(simulate_route))
                .with_state(seen.clone()),
        )
        .await;
        let client = HttpSimulationClient::new(&base, Some("69420")).unwrap();

        let outcome = simulate(&client, &request()).await;

        assert_eq!(
            outcome,
            SimulateOutcome::Delivered("Trainer: Correct, the valve is now open ✅".to_string())
        );
        let bodies = seen.bodies.lock().unwrap();
        assert_eq!(
            bodies[0],
            json!({
                "action": "open valve",
                "history": [{"role": "user", "content": "inspect pump"}],
                "language": "Spanish"
            })
        );
        assert_eq!(seen.tunnel.lock().unwrap().as_deref(), Some("69420"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_severed() {
        let base = serve(Router::new().route(
            "/simulate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let client = HttpSimulationClient::new(&base, None).unwrap();

        let outcome = simulate(&client, &request()).await;
        assert_eq!(outcome, SimulateOutcome::Severed);
        assert_eq!(outcome.text(), SEVERED_NARRATIVE);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_severed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpSimulationClient::new(&format!("http://{addr}"), None).unwrap();

        assert_eq!(simulate(&client, &request()).await, SimulateOutcome::Severed);
        assert_eq!(start_simulation(&client).await, SimulateOutcome::Severed);
    }

    #[tokio::test]
    async fn test_start_simulation_endpoint() {
        let base = serve(Router::new().route(
            "/start-simulation",
            post(|| async { Json(json!({"response": "Welcome, operator."})) }),
        ))
        .await;
        let client = HttpSimulationClient::new(&base, None).unwrap();
        assert_eq!(
            start_simulation(&client).await,
            SimulateOutcome::Delivered("Welcome, operator.".to_string())
        );
    }

    #[tokio::test]
    async fn test_generate_image_inline_and_remote() {
        let base = serve(Router::new().route("/generate_image", post(image_route))).await;
        let client = HttpSimulationClient::new(&base, None).unwrap();

        let inline = client.generate_image("pressure gauge").await.unwrap();
        assert_eq!(
            inline,
            ImageData::Inline {
                mime: "image/png".to_string(),
                bytes: vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a],
            }
        );
        assert_eq!(inline.extension(), "png");

        let remote = client.generate_image("valve").await.unwrap();
        assert_eq!(remote, ImageData::Remote("https://images.example/valve".to_string()));
    }

    #[tokio::test]
    async fn test_upload_document_sends_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manual.pdf");
        std::fs::write(&path, b"%PDF-1.4 pump manual").unwrap();

        let base = serve(Router::new().route("/upload", post(upload_route))).await;
        let client = HttpSimulationClient::new(&base, None).unwrap();

        let receipt = client.upload_document(&path).await.unwrap();
        assert_eq!(receipt.status, "success");
        assert_eq!(receipt.char_count, Some(20));
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_io_error() {
        let client = HttpSimulationClient::new("http://127.0.0.1:9", None).unwrap();
        let err = client
            .upload_document(Path::new("/nonexistent/manual.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn test_routes_are_relative_to_base_path() {
        let client = HttpSimulationClient::new("https://abc.ngrok.app/api", None).unwrap();
        assert_eq!(client.base_url().as_str(), "https://abc.ngrok.app/api/");
        assert_eq!(
            client.route("simulate").unwrap().as_str(),
            "https://abc.ngrok.app/api/simulate"
        );
    }

    #[test]
    fn test_image_parse_rejects_garbage() {
        assert!(ImageData::parse("").is_err());
        assert!(ImageData::parse("data:image/png,raw").is_err());
        assert!(ImageData::parse("data:image/png;base64,@@@").is_err());
        assert_eq!(
            ImageData::parse("data:image/jpeg;base64,AAAA").unwrap().extension(),
            "jpg"
        );
    }
}
