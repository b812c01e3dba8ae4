use crate::credentials::CredentialManager;
use crate::scheduler::PollScheduler;
use anyhow::Result;
use tokio::net::{UnixListener, UnixStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use serde::{Deserialize, Serialize};
use log::{info, error, warn};
use std::sync::Arc;
use std::time::Instant;

/// What the admin socket can see. Built once in `main`.
#[derive(Clone)]
pub struct AdminState {
    pub scheduler: Arc<PollScheduler>,
    pub credentials: Arc<CredentialManager>,
    pub started_at: Instant,
}

#[derive(Deserialize)]
#[serde(tag = "method")]
enum IpcRequest {
    #[serde(rename = "health")]
    Health,
    #[serde(rename = "secret_expiry")]
    SecretExpiry,
    #[serde(rename = "status")]
    Status,
}

#[derive(Serialize)]
struct IpcResponse {
    success: bool,
    data: serde_json::Value,
}

pub async fn start_ipc_server(state: AdminState, socket_path: String) -> Result<()> {
    // Remove old socket if exists
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o660);
        std::fs::set_permissions(&socket_path, perms)?;
    }

    info!("IPC server listening on {}", socket_path);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state).await {
                            error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    });

    Ok(())
}

async fn handle_client(mut stream: UnixStream, state: AdminState) -> Result<()> {
    let mut buffer = vec![0u8; 8192];
    let n = stream.read(&mut buffer).await?;

    if n == 0 {
        return Ok(());
    }

    let request_str = String::from_utf8_lossy(&buffer[..n]);
    info!("IPC request: {}", request_str.trim());

    let response = match serde_json::from_str::<IpcRequest>(&request_str) {
        Ok(req) => handle_request(req, &state).await,
        Err(e) => {
            warn!("Invalid request: {}", e);
            IpcResponse {
                success: false,
                data: serde_json::json!({"error": format!("Invalid request: {}", e)}),
            }
        }
    };

    let response_json = serde_json::to_string(&response)?;
    stream.write_all(response_json.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    Ok(())
}

async fn handle_request(req: IpcRequest, state: &AdminState) -> IpcResponse {
    match req {
        IpcRequest::Health => IpcResponse {
            success: true,
            data: serde_json::json!("OK"),
        },
        IpcRequest::SecretExpiry => {
            let snapshot = state.credentials.snapshot().await;
            IpcResponse {
                success: true,
                data: serde_json::to_value(snapshot).unwrap_or_default(),
            }
        }
        IpcRequest::Status => handle_status(state).await,
    }
}

async fn handle_status(state: &AdminState) -> IpcResponse {
    let credentials = state.credentials.snapshot().await;
    let last_cycle = state.scheduler.last_cycle();

    IpcResponse {
        success: true,
        data: serde_json::json!({
            "status": if state.scheduler.is_running() { "running" } else { "stopped" },
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "interval_seconds": state.scheduler.interval().as_secs(),
            "last_cycle": last_cycle,
            "credentials": credentials,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CycleResult;
    use crate::poller::{CycleReport, CycleRunner};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopRunner;

    #[async_trait]
    impl CycleRunner for NoopRunner {
        async fn run_cycle(&self) -> CycleResult<CycleReport> {
            Ok(CycleReport::default())
        }
    }

    async fn serve(dir: &tempfile::TempDir) -> (String, AdminState) {
        let socket_path = dir.path().join("evwatch.sock").to_string_lossy().into_owned();
        let state = AdminState {
            scheduler: Arc::new(PollScheduler::new(Arc::new(NoopRunner), Duration::from_secs(300))),
            credentials: Arc::new(CredentialManager::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9/oauth/token".to_string(),
                "uid".to_string(),
                "s-secret".to_string(),
            )),
            started_at: Instant::now(),
        };
        start_ipc_server(state.clone(), socket_path.clone()).await.unwrap();
        (socket_path, state)
    }

    async fn call(socket_path: &str, request: &str) -> serde_json::Value {
        let mut stream = UnixStream::connect(socket_path).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await.unwrap();
        serde_json::from_slice(&buffer).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, _) = serve(&dir).await;

        let response = call(&socket, r#"{"method":"health"}"#).await;
        assert_eq!(response["success"], true);
        assert_eq!(response["data"], "OK");
    }

    #[tokio::test]
    async fn test_secret_expiry_before_any_token() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, _) = serve(&dir).await;

        let response = call(&socket, r#"{"method":"secret_expiry"}"#).await;
        assert_eq!(response["success"], true);
        assert_eq!(response["data"]["has_token"], false);
        assert!(response["data"]["secret_expires_at"].is_null());
        assert_eq!(response["data"]["notified_thresholds"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_status_reports_last_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, state) = serve(&dir).await;
        state.scheduler.run_once().await;

        let response = call(&socket, r#"{"method":"status"}"#).await;
        let data = &response["data"];
        assert_eq!(data["status"], "stopped");
        assert_eq!(data["interval_seconds"], 300);
        assert_eq!(data["last_cycle"]["outcome"]["status"], "succeeded");
    }

    #[tokio::test]
    async fn test_unknown_method_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (socket, _) = serve(&dir).await;

        let response = call(&socket, r#"{"method":"subscribe"}"#).await;
        assert_eq!(response["success"], false);
        assert!(response["data"]["error"].as_str().unwrap().starts_with("Invalid request"));
    }
}
