#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::Router;
use futures_util::stream;
use url::Url;

use http_upload::config::Config;
use http_upload::http::HttpTransport;
use http_upload::service::{DiscoInfo, MAX_FILE_SIZE_FIELD};
use http_upload::telemetry::HttpStats;
use http_upload::transfer::{TransferEvent, TransferListener, TransferStatus};
use http_upload::wire::{self, Slot, NAMESPACE};
use http_upload::{Destination, IqReply, MessageSender, SessionTransport, UploadManager};

pub const SERVER: &str = "capulet.lit";
pub const UPLOAD_SERVICE: &str = "upload.capulet.lit";

/// Scratch directory unique to one test.
pub fn scratch(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("http-upload-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[derive(Default)]
pub struct ServerState {
    pub put_status: AtomicU16,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub put_headers: Mutex<Vec<HeaderMap>>,
}

/// Local stand-in for an upload service's HTTP side.
pub struct FileServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl FileServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        state.put_status.store(201, Ordering::SeqCst);
        let app = Router::new()
            .route("/files/:name", get(serve_file).put(store_file))
            .route("/slow", get(slow_body))
            .route("/stall/:name", put(stall_upload))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{path}", self.addr)).unwrap()
    }

    pub fn set_put_status(&self, status: u16) {
        self.state.put_status.store(status, Ordering::SeqCst);
    }

    pub fn publish(&self, name: &str, body: Vec<u8>) {
        self.state.files.lock().unwrap().insert(name.to_string(), body);
    }

    pub fn stored(&self, name: &str) -> Option<Vec<u8>> {
        self.state.files.lock().unwrap().get(name).cloned()
    }
}

async fn store_file(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.put_headers.lock().unwrap().push(headers);
    let status = StatusCode::from_u16(state.put_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_success() {
        state.files.lock().unwrap().insert(name, body.to_vec());
    }
    status
}

async fn serve_file(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<Vec<u8>, StatusCode> {
    state
        .files
        .lock()
        .unwrap()
        .get(&name)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

/// Takes the whole upload, then never answers.
async fn stall_upload(_body: Bytes) -> StatusCode {
    tokio::time::sleep(Duration::from_secs(300)).await;
    StatusCode::CREATED
}

/// Never-ending body trickling one small chunk every 50ms.
async fn slow_body() -> Body {
    let chunks = stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Some((Ok::<_, std::io::Error>(Bytes::from_static(b"0123456789")), ()))
    });
    Body::from_stream(chunks)
}

/// Session with one upload service that hands out slots on `server`.
pub struct FakeSession {
    base: Url,
    max_file_size: Option<u64>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeSession {
    pub fn new(server: &FileServer, max_file_size: Option<u64>) -> Self {
        Self::with_slot_base(server.url("/files/"), max_file_size)
    }

    /// Hands out slots whose PUT never gets an answer.
    pub fn stalling(server: &FileServer) -> Self {
        Self::with_slot_base(server.url("/stall/"), None)
    }

    fn with_slot_base(base: Url, max_file_size: Option<u64>) -> Self {
        Self {
            base,
            max_file_size,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SessionTransport for FakeSession {
    fn service_name(&self) -> String {
        SERVER.to_string()
    }

    async fn discover_items(&self, _address: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![format!("conference.{SERVER}"), UPLOAD_SERVICE.to_string()])
    }

    async fn discover_info(&self, address: &str) -> anyhow::Result<DiscoInfo> {
        let mut info = DiscoInfo::new(address);
        if address == UPLOAD_SERVICE {
            info = info.with_feature(NAMESPACE);
            if let Some(max) = self.max_file_size {
                info = info.with_form_field(NAMESPACE, MAX_FILE_SIZE_FIELD, max.to_string());
            }
        }
        Ok(info)
    }

    async fn send_request(&self, to: &str, payload: String) -> anyhow::Result<IqReply> {
        self.requests.lock().unwrap().push(payload.clone());
        let (version, req) = wire::decode_request(to, &payload)?;
        let url = self.base.join(req.filename())?;
        let slot = Slot::new(url.clone(), url).with_header("Authorization", "Bearer slot-token");
        Ok(IqReply::Result(wire::encode_slot(version, &slot)))
    }
}

/// Records every message it is asked to deliver.
#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<(Destination, String)>>,
}

#[async_trait]
impl MessageSender for Outbox {
    async fn send_text(&self, to: &Destination, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((to.clone(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<TransferEvent>>,
}

impl Recorder {
    pub fn statuses(&self) -> Vec<TransferStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Status { new, .. } => Some(*new),
                TransferEvent::Progress { .. } => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { bytes, .. } => Some(*bytes),
                TransferEvent::Status { .. } => None,
            })
            .collect()
    }

    /// Polls until a terminal status has been delivered.
    pub async fn settled(&self) {
        for _ in 0..200 {
            if self.statuses().iter().any(|s| s.is_terminal()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no terminal event delivered");
    }
}

impl TransferListener for Recorder {
    fn transfer_event(&self, event: &TransferEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn manager(session: Arc<FakeSession>) -> Arc<UploadManager> {
    let http = HttpTransport::new(&Config::default(), Arc::new(HttpStats::default())).unwrap();
    Arc::new(UploadManager::new(session, http))
}
