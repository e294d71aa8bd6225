//! Talking to the daemon's endpoints
//!
//! Pull endpoints are plain connect-and-read. The `rule-update` endpoint is
//! inverted: the client listens and the daemon connects on its next tick.

use anyhow::{Context, Result, anyhow};
use protocol::{
    Endpoint, Request, decode_block, encode_request, read_frame_async, write_frame_async,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

/// Read every string of one pull endpoint
pub async fn pull(socket_dir: &Path, endpoint: Endpoint) -> Result<Vec<String>> {
    let path = endpoint.path_in(socket_dir);
    let mut stream = UnixStream::connect(&path)
        .await
        .with_context(|| format!("Failed to connect to {}", path.display()))?;

    let payload = read_frame_async(&mut stream)
        .await
        .with_context(|| format!("Failed to read from {}", endpoint))?;
    let lines = decode_block(&payload).with_context(|| format!("Malformed {} frame", endpoint))?;

    debug!("Received {} line(s) from {}", lines.len(), endpoint);
    Ok(lines)
}

/// Wait up to `wait` for the daemon to connect, then hand it `request`
pub async fn push(socket_dir: &Path, request: &Request, wait: Duration) -> Result<()> {
    let frame = encode_request(request).context("Failed to encode request")?;
    let listener = UpdateListener::bind(socket_dir)?;

    info!("Waiting for the daemon on {}", listener.path.display());
    let (mut stream, _) = tokio::time::timeout(wait, listener.inner.accept())
        .await
        .map_err(|_| anyhow!("Daemon did not connect within {:?}", wait))?
        .context("Failed to accept daemon connection")?;

    write_frame_async(&mut stream, &frame)
        .await
        .context("Failed to send request")?;
    stream.shutdown().await.ok();

    debug!("Sent {:?} request", request.request_type());
    Ok(())
}

/// Listener on `rule-update` whose socket file is removed on drop
struct UpdateListener {
    inner: UnixListener,
    path: PathBuf,
}

impl UpdateListener {
    fn bind(socket_dir: &Path) -> Result<Self> {
        let path = Endpoint::RuleUpdate.path_in(socket_dir);

        // Another editor may have left its socket behind
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            use std::os::unix::fs::FileTypeExt;
            if !metadata.file_type().is_socket() {
                return Err(anyhow!("{} exists but is not a socket", path.display()));
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale {}", path.display()))?;
        }

        let inner = UnixListener::bind(&path)
            .with_context(|| format!("Failed to listen on {}", path.display()))?;
        Ok(Self { inner, path })
    }
}

impl Drop for UpdateListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{decode_request, encode_block, read_optional_frame_async};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pull_reads_one_frame() {
        let dir = TempDir::new().unwrap();
        let listener = UnixListener::bind(Endpoint::RuleSet.path_in(dir.path())).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = encode_block(&["0 0 0 0 8 0", "0 0 0 0 0 1"]).unwrap();
            write_frame_async(&mut stream, &frame).await.unwrap();
        });

        let lines = pull(dir.path(), Endpoint::RuleSet).await.unwrap();
        assert_eq!(lines, vec!["0 0 0 0 8 0", "0 0 0 0 0 1"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_pull_without_daemon_fails() {
        let dir = TempDir::new().unwrap();
        assert!(pull(dir.path(), Endpoint::InterfaceInfo).await.is_err());
    }

    #[tokio::test]
    async fn test_push_delivers_request_to_daemon() {
        let dir = TempDir::new().unwrap();
        let socket_dir = dir.path().to_path_buf();
        let request = Request::LoadRuleSet("office.rules".to_string());

        let client = {
            let request = request.clone();
            let socket_dir = socket_dir.clone();
            tokio::spawn(async move {
                push(&socket_dir, &request, Duration::from_secs(5)).await
            })
        };

        // act as the daemon polling on its tick
        let path = Endpoint::RuleUpdate.path_in(&socket_dir);
        let mut stream = loop {
            match UnixStream::connect(&path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let payload = read_optional_frame_async(&mut stream)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode_request(&payload).unwrap(), request);

        client.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_push_times_out_without_daemon() {
        let dir = TempDir::new().unwrap();
        let request = Request::SaveRuleSet("later.rules".to_string());

        let result = push(dir.path(), &request, Duration::from_millis(20)).await;
        assert!(result.is_err());
        assert!(!Endpoint::RuleUpdate.path_in(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_push_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        std::mem::forget(UpdateListener::bind(dir.path()).unwrap());

        let request = Request::SaveRuleSet("later.rules".to_string());
        let result = push(dir.path(), &request, Duration::from_millis(20)).await;

        // bound fine, then timed out waiting
        assert!(result.unwrap_err().to_string().contains("did not connect"));
    }
}
