//! Probe actions
//!
//! Each batch action turns its subjects into a lazy, order-preserving stream
//! of `(subject, ProbeResult)` pairs. Subjects are processed one at a time
//! as the stream is polled, and a failure never stops the rest of the batch.

use crate::error::{error_chain, ProbeError, ProbeResult, SessionError};
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::HOST;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default bound on each HTTP request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Single argument passed to every probed executable
pub const COMMAND_ARGUMENT: &str = "arg1";

/// Virtual host of the IP-echo service
pub const IP_ECHO_HOST: &str = "httpbin.org";

/// Path on the IP-echo service that reports the caller's address
pub const IP_ECHO_PATH: &str = "/ip";

#[derive(Debug, Deserialize)]
struct IpEcho {
    origin: String,
}

/// HTTP side of the probe
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    echo_host: String,
    echo_path: String,
}

impl HttpProber {
    /// Create a prober whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            echo_host: IP_ECHO_HOST.to_string(),
            echo_path: IP_ECHO_PATH.to_string(),
        })
    }

    /// Point `probe_also_proxy` at a different IP-echo service
    pub fn with_echo_service(mut self, host: impl Into<String>, path: impl Into<String>) -> Self {
        self.echo_host = host.into();
        self.echo_path = path.into();
        self
    }

    /// GET `url` and decode the body as UTF-8
    pub async fn fetch_text(&self, url: &str) -> ProbeResult {
        info!("Retrieving {}", url);
        let result = receive_text(self.client.get(url)).await;
        log_result(url, &result);
        result
    }

    /// Ask the IP-echo service which address our traffic leaves from,
    /// connecting to `hostname` instead of the service itself
    ///
    /// Always plain HTTP so no SNI is sent; the `Host` header selects the
    /// virtual host.
    pub async fn probe_also_proxy(&self, hostname: &str) -> ProbeResult {
        let url = format!("http://{}{}", hostname, self.echo_path);
        info!("Retrieving {} as {}", url, self.echo_host);

        let request = self.client.get(&url).header(HOST, self.echo_host.as_str());
        let result = receive_text(request).await.and_then(|body| {
            debug!("Got {:?} from webserver", body);
            serde_json::from_str::<IpEcho>(&body)
                .map(|echo| echo.origin)
                .map_err(|e| ProbeError::Decode(format!("unexpected IP-echo response: {}", e)))
        });
        log_result(&url, &result);
        result
    }
}

async fn receive_text(request: RequestBuilder) -> ProbeResult {
    let response = request
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(ProbeError::from_http)?;
    let body = response.bytes().await.map_err(ProbeError::from_http)?;
    debug!("Got {} bytes", body.len());

    String::from_utf8(body.to_vec()).map_err(|e| ProbeError::Decode(e.to_string()))
}

fn log_result(subject: &str, result: &ProbeResult) {
    match result {
        Ok(value) => debug!("{} succeeded ({} bytes)", subject, value.len()),
        Err(e) => warn!(kind = ?e.kind(), "{} failed: {}", subject, e),
    }
}

/// Fetch each URL in turn
pub fn probe_urls<'a, I>(http: &'a HttpProber, urls: I) -> impl Stream<Item = (String, ProbeResult)> + 'a
where
    I: IntoIterator<Item = String>,
    I::IntoIter: 'a,
{
    stream::iter(urls).then(move |url| async move {
        let result = http.fetch_text(&url).await;
        (url, result)
    })
}

/// Run `name arg1` and capture its standard output
///
/// The child gets no stdin so it cannot swallow control lines meant for us.
pub async fn run_command(name: &str) -> ProbeResult {
    info!("Running {} {}", name, COMMAND_ARGUMENT);

    let output = Command::new(name)
        .arg(COMMAND_ARGUMENT)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProbeError::ProcessNotFound(name.to_string()),
            _ => ProbeError::Io(format!("failed to run {}: {}", name, error_chain(&e))),
        });

    let result = output.and_then(|output| {
        if !output.status.success() {
            return Err(ProbeError::ExitNonZero(exit_code(output.status)));
        }
        String::from_utf8(output.stdout).map_err(|e| ProbeError::Decode(e.to_string()))
    });
    log_result(name, &result);
    result
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Run each executable in turn
pub fn probe_commands<I>(names: I) -> impl Stream<Item = (String, ProbeResult)>
where
    I: IntoIterator<Item = String>,
{
    stream::iter(names).then(|name| async move {
        let result = run_command(&name).await;
        (name, result)
    })
}

/// Place `path` under `root`
///
/// Absolute paths are taken relative to the root as well, so `/etc/hosts`
/// names the remote `etc/hosts` rather than the local one.
pub fn resolve_path(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Read a file under the execution root
pub async fn read_path(root: &Path, path: &str) -> ProbeResult {
    let resolved = resolve_path(root, path);
    debug!("Reading {}", resolved.display());

    let result = match tokio::fs::read(&resolved).await {
        Ok(bytes) => String::from_utf8(bytes).map_err(|e| ProbeError::Decode(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ProbeError::FileNotFound(resolved.display().to_string()))
        }
        Err(e) => Err(ProbeError::Io(format!("{}: {}", resolved.display(), e))),
    };
    log_result(path, &result);
    result
}

/// Read each path under `root` in turn
pub fn probe_paths<'a, I>(root: &'a Path, paths: I) -> impl Stream<Item = (String, ProbeResult)> + 'a
where
    I: IntoIterator<Item = String>,
    I::IntoIter: 'a,
{
    stream::iter(paths).then(move |path| async move {
        let result = read_path(root, &path).await;
        (path, result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Serve `response` to every connection and report each request head
    async fn canned_server(response: &'static [u8]) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
                let _ = socket.write_all(response).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, rx)
    }

    fn http_response(status: &str, body: &str) -> &'static [u8] {
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        Box::leak(response.into_bytes().into_boxed_slice())
    }

    #[cfg(unix)]
    fn script(dir: &TempDir, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_fetch_text_success() {
        let (addr, _requests) = canned_server(http_response("200 OK", "hello from inside")).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let result = http.fetch_text(&format!("http://{}/", addr)).await;
        assert_eq!(result, Ok("hello from inside".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_text_http_error_status() {
        let (addr, _requests) = canned_server(http_response("404 Not Found", "missing")).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let err = http.fetch_text(&format!("http://{}/", addr)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.to_string().contains("404"), "unexpected message: {}", err);
    }

    #[tokio::test]
    async fn test_fetch_text_invalid_utf8() {
        let (addr, _requests) =
            canned_server(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n\xff\xfe").await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let err = http.fetch_text(&format!("http://{}/", addr)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[tokio::test]
    async fn test_fetch_text_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let http = HttpProber::new(Duration::from_millis(200)).unwrap();
        let err = http.fetch_text(&format!("http://{}/", addr)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_probe_urls_keeps_order_under_mixed_failures() {
        let (addr, _requests) = canned_server(http_response("200 OK", "up")).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let urls = vec![
            "not a url".to_string(),
            format!("http://{}/first", addr),
            "http://127.0.0.1:1/".to_string(),
            format!("http://{}/second", addr),
        ];
        let results: Vec<_> = probe_urls(&http, urls.clone()).collect().await;

        let subjects: Vec<_> = results.iter().map(|(url, _)| url.clone()).collect();
        assert_eq!(subjects, urls);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1, Ok("up".to_string()));
        assert_eq!(results[2].1.as_ref().unwrap_err().kind(), ErrorKind::NetworkError);
        assert_eq!(results[3].1, Ok("up".to_string()));
    }

    #[tokio::test]
    async fn test_probe_urls_is_lazy() {
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();
        let mut stream = Box::pin(probe_urls(&http, vec!["http://127.0.0.1:1/".to_string()]));

        let (url, result) = stream.next().await.unwrap();
        assert_eq!(url, "http://127.0.0.1:1/");
        assert!(result.is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_probe_also_proxy_forces_host_header() {
        let (addr, mut requests) =
            canned_server(http_response("200 OK", r#"{"origin": "203.0.113.7"}"#)).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let result = http.probe_also_proxy(&addr.to_string()).await;
        assert_eq!(result, Ok("203.0.113.7".to_string()));

        let head = requests.recv().await.unwrap().to_lowercase();
        assert!(head.starts_with("get /ip http/1.1"), "unexpected request: {}", head);
        assert!(head.contains("host: httpbin.org"), "unexpected request: {}", head);
    }

    #[tokio::test]
    async fn test_probe_also_proxy_custom_echo_service() {
        let (addr, mut requests) =
            canned_server(http_response("200 OK", r#"{"origin": "198.51.100.1"}"#)).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT)
            .unwrap()
            .with_echo_service("echo.test", "/origin");

        let result = http.probe_also_proxy(&addr.to_string()).await;
        assert_eq!(result, Ok("198.51.100.1".to_string()));

        let head = requests.recv().await.unwrap().to_lowercase();
        assert!(head.starts_with("get /origin "));
        assert!(head.contains("host: echo.test"));
    }

    #[tokio::test]
    async fn test_probe_also_proxy_rejects_non_json() {
        let (addr, _requests) = canned_server(http_response("200 OK", "<html>nope</html>")).await;
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();

        let err = http.probe_also_proxy(&addr.to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[tokio::test]
    async fn test_probe_also_proxy_unreachable() {
        let http = HttpProber::new(DEFAULT_HTTP_TIMEOUT).unwrap();
        let err = http.probe_also_proxy("127.0.0.1:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_classification() {
        let dir = TempDir::new().unwrap();
        let echo = script(&dir, "echoer", "echo \"got $1\"");
        let exit_two = script(&dir, "exit-two", "exit 2");
        let missing = dir.path().join("does-not-exist").display().to_string();

        let results: Vec<_> = probe_commands(vec![echo.clone(), exit_two.clone(), missing.clone()])
            .collect()
            .await;

        assert_eq!(results[0], (echo, Ok("got arg1\n".to_string())));
        assert_eq!(results[1], (exit_two, Err(ProbeError::ExitNonZero(2))));
        assert_eq!(results[2].0, missing);
        assert_eq!(results[2].1.as_ref().unwrap_err().kind(), ErrorKind::ProcessNotFound);
        assert_ne!(results[1].1, results[2].1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_killed_by_signal() {
        let dir = TempDir::new().unwrap();
        let suicidal = script(&dir, "suicidal", "kill -9 $$");

        assert_eq!(run_command(&suicidal).await, Err(ProbeError::ExitNonZero(-9)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_not_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain-file");
        std::fs::write(&path, "not a program").unwrap();

        let err = run_command(&path.display().to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/tmp/root");
        assert_eq!(resolve_path(root, "etc/hosts"), PathBuf::from("/tmp/root/etc/hosts"));
        assert_eq!(resolve_path(root, "/etc/hosts"), PathBuf::from("/tmp/root/etc/hosts"));
    }

    #[tokio::test]
    async fn test_probe_paths() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("podinfo")).unwrap();
        std::fs::write(root.path().join("podinfo/labels"), "hello=\"monkeys\"\r\nname=x").unwrap();
        std::fs::write(root.path().join("binary"), [0xFFu8, 0x00]).unwrap();

        let paths = vec![
            "podinfo/labels".to_string(),
            "missing".to_string(),
            "/podinfo/labels".to_string(),
            "binary".to_string(),
        ];
        let results: Vec<_> = probe_paths(root.path(), paths.clone()).collect().await;

        let on_disk = std::fs::read_to_string(root.path().join("podinfo/labels")).unwrap();
        assert_eq!(results.len(), paths.len());
        assert_eq!(results[0], ("podinfo/labels".to_string(), Ok(on_disk.clone())));
        assert_eq!(results[1].0, "missing");
        assert_eq!(results[1].1.as_ref().unwrap_err().kind(), ErrorKind::FileNotFound);
        assert_eq!(results[2].1, Ok(on_disk));
        assert_eq!(results[3].1.as_ref().unwrap_err().kind(), ErrorKind::DecodeError);
    }

    #[tokio::test]
    async fn test_read_directory_is_io_error() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("dir")).unwrap();

        let err = read_path(root.path(), "dir").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
