use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::mcp::McpConfig;
use crate::mcp::protocol::{
    ERROR_INVALID_REQUEST, ERROR_PARSE, JSONRPC_VERSION, JsonRpcErrorResponse, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResult, invalid_params, method_not_found,
};
use crate::mcp::tools;
use crate::memory::{CharacterMemory, MemoryStore};
use crate::session::MudSession;

pub struct McpServer {
    config: McpConfig,
    service: Arc<McpService>,
}

struct SocketCleanup(PathBuf);

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.0) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.0.display(), error = %err, "failed to clean mcp socket");
            }
        }
    }
}

impl McpServer {
    pub fn new(
        config: McpConfig,
        session: Arc<MudSession>,
        store: MemoryStore,
        default_read_window: Duration,
    ) -> Self {
        let service = Arc::new(McpService {
            session,
            store,
            current: Mutex::new(None),
            default_read_window,
        });
        Self { config, service }
    }

    pub fn handle(&self) -> McpServerHandle {
        McpServerHandle {
            service: Arc::clone(&self.service),
        }
    }

    pub async fn run(self) -> Result<()> {
        if self.config.use_stdio() {
            self.run_stdio().await
        } else {
            self.run_socket().await
        }
    }

    async fn run_stdio(self) -> Result<()> {
        info!("mcp server running on stdio");
        let service = Arc::clone(&self.service);
        let stdin = io::stdin();
        let stdout = io::stdout();
        handle_connection(stdin, stdout, service).await;
        Ok(())
    }

    async fn run_socket(self) -> Result<()> {
        let path = self
            .config
            .socket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("mcp socket path missing"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create socket dir {parent:?}"))?;
        }
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("remove existing socket {path:?}"))?;
        }
        let listener =
            UnixListener::bind(&path).with_context(|| format!("bind mcp socket at {path:?}"))?;
        let _cleanup = SocketCleanup(path.clone());
        info!(socket = %path.display(), "mcp server listening");

        let service = Arc::clone(&self.service);
        loop {
            let (stream, _addr) = listener.accept().await?;
            debug!("accepted mcp connection");
            let service = service.clone();
            tokio::spawn(async move {
                handle_unix_stream(stream, service).await;
            });
        }
    }
}

#[derive(Clone)]
pub struct McpServerHandle {
    service: Arc<McpService>,
}

impl McpServerHandle {
    pub fn spawn_connection<R, W>(&self, reader: R, writer: W) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            handle_connection(reader, writer, service).await;
        })
    }
}

async fn handle_unix_stream(stream: UnixStream, service: Arc<McpService>) {
    let (read_half, write_half) = stream.into_split();
    handle_connection(read_half, write_half, service).await;
}

async fn handle_connection<R, W>(reader: R, writer: W, service: Arc<McpService>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<serde_json::Value>(128);
    let writer_task = tokio::spawn(async move {
        write_loop(writer, &mut rx).await;
    });

    let mut reader = BufReader::new(reader);
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<serde_json::Value>(trimmed) {
                    Ok(value) => match serde_json::from_value::<JsonRpcRequest>(value.clone()) {
                        Ok(request) => {
                            if request.jsonrpc != JSONRPC_VERSION {
                                request.id.clone().map(|id| {
                                    invalid_params(Some(id), "jsonrpc version must be 2.0")
                                })
                            } else {
                                service.handle_request(request).await
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "invalid JSON-RPC request");
                            Some(JsonRpcResponse::Error(JsonRpcErrorResponse::new(
                                None,
                                ERROR_INVALID_REQUEST,
                                "invalid request",
                                Some(value),
                            )))
                        }
                    },
                    Err(err) => {
                        warn!(error = %err, "failed to parse JSON payload");
                        Some(JsonRpcResponse::Error(JsonRpcErrorResponse::new(
                            None,
                            ERROR_PARSE,
                            "invalid json",
                            None,
                        )))
                    }
                };
                if let Some(response) = response {
                    match serde_json::to_value(&response) {
                        Ok(value) => {
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => error!(error = %err, "failed to serialize response"),
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "connection read error");
                break;
            }
        }
    }

    writer_task.abort();
}

async fn write_loop<W>(mut writer: W, rx: &mut mpsc::Receiver<serde_json::Value>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        match serde_json::to_string(&message) {
            Ok(mut text) => {
                text.push('\n');
                if writer.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Err(err) => {
                error!(error = %err, "failed to serialize json");
            }
        }
    }
}

struct McpService {
    session: Arc<MudSession>,
    store: MemoryStore,
    current: Mutex<Option<CharacterMemory>>,
    default_read_window: Duration,
}

impl McpService {
    async fn handle_request(self: &Arc<Self>, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let method = request.method.as_str();
        let params = request.params.unwrap_or_else(|| serde_json::json!({}));
        match method {
            "initialize" => {
                let response_id = id.unwrap_or(serde_json::Value::Null);
                Some(JsonRpcResponse::Result(JsonRpcResult::new(
                    response_id,
                    serde_json::json!({
                        "protocolVersion": "2024-10-01",
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": "mudgate",
                            "version": env!("CARGO_PKG_VERSION"),
                        }
                    }),
                )))
            }
            "ping" => id.map(|value| {
                JsonRpcResponse::Result(JsonRpcResult::new(value, serde_json::json!({"ok": true})))
            }),
            "tools/list" => {
                let result = serde_json::json!({"tools": tools::list_tools()});
                Some(JsonRpcResponse::Result(JsonRpcResult::new(
                    id.unwrap_or(serde_json::Value::Null),
                    result,
                )))
            }
            "tools/call" => match self.tools_call(&params).await {
                Ok(value) => Some(JsonRpcResponse::Result(JsonRpcResult::new(
                    id.unwrap_or(serde_json::Value::Null),
                    value,
                ))),
                Err(err) => Some(err.into_response(id)),
            },
            method if method.starts_with("notifications/") => None,
            _ => Some(method_not_found(id, method)),
        }
    }

    async fn tools_call(&self, params: &serde_json::Value) -> Result<serde_json::Value, McpError> {
        let name = params
            .get("name")
            .or_else(|| params.get("tool"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| McpError::invalid("tool name missing"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        debug!(tool = name, "tool call");
        match name {
            tools::MUD_CONNECT => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_connect(&self.session, &request).await)
            }
            tools::MUD_SEND => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_send(&self.session, &request).await)
            }
            tools::MUD_READ => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_read(&self.session, &request, self.default_read_window).await)
            }
            tools::MUD_DISCONNECT => Ok(tools::handle_disconnect(&self.session).await),
            tools::MEMORY_LOAD => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_memory_load(&self.store, &self.current, &request).await)
            }
            tools::MEMORY_UPDATE => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_memory_update(&self.store, &self.current, request).await)
            }
            tools::MEMORY_ADD_NOTE => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_memory_add_note(&self.store, &self.current, &request).await)
            }
            tools::MEMORY_GET => {
                let request = parse_args(arguments)?;
                Ok(tools::handle_memory_get(&self.current, &request).await)
            }
            _ => Err(McpError::not_found(format!("unknown tool '{name}'"))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: serde_json::Value) -> Result<T, McpError> {
    serde_json::from_value(arguments).map_err(|err| McpError::invalid(err.to_string()))
}

#[derive(Debug)]
enum McpError {
    Invalid(String),
    NotFound(String),
}

impl McpError {
    fn invalid(message: impl Into<String>) -> Self {
        McpError::Invalid(message.into())
    }
    fn not_found(message: impl Into<String>) -> Self {
        McpError::NotFound(message.into())
    }

    fn into_response(self, id: Option<serde_json::Value>) -> JsonRpcResponse {
        match self {
            McpError::Invalid(message) => invalid_params(id, message),
            McpError::NotFound(message) => method_not_found(id, &message),
        }
    }
}
