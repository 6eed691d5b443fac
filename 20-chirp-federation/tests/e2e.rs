use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn binary_serves_snapshot_and_federates() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chirp_federation");

    let peer_root = tempfile::tempdir()?;
    std::fs::write(
        peer_root.path().join("chirps.json"),
        r#"[{"id": 5, "username": "bob", "content": "seeded on b", "timestamp": "2024-11-02T09:30"}]"#,
    )?;
    let (mut peer_child, mut peer_stdout) = spawn_node(binary, peer_root.path(), &[]).await?;
    let peer_addr = read_listen_addr(&mut peer_stdout).await?;
    let peer_log_task = tokio::spawn(drain_stdout(peer_stdout));

    let root = tempfile::tempdir()?;
    std::fs::write(root.path().join("index.html"), "<title>Chirply</title>")?;
    let (mut child, mut stdout) =
        spawn_node(binary, root.path(), &["--peer", peer_addr.as_str()]).await?;
    let addr = read_listen_addr(&mut stdout).await?;
    let log_task = tokio::spawn(drain_stdout(stdout));

    // The peer's snapshot chirp keeps its identifier; the peer's own counter
    // continues after it.
    let created = http(&peer_addr, "POST /chirps", r#"{"username":"bob","content":"live on b"}"#).await?;
    assert!(created.starts_with("HTTP/1.1 201 Created\r\n"), "{created}");
    assert!(created.contains(r#""id":6"#), "{created}");

    let created = http(&addr, "POST /chirps", r#"{"username":"alice","content":"hello"}"#).await?;
    assert!(created.contains(r#""id":1"#), "{created}");

    let feed = http(&addr, "GET /chirps", "").await?;
    assert!(feed.starts_with("HTTP/1.1 200 OK\r\n"), "{feed}");
    let body = feed.split("\r\n\r\n").nth(1).context("feed without body")?;
    let json: serde_json::Value = serde_json::from_str(body)?;
    let contents: Vec<_> = json["chirps"]
        .as_array()
        .context("chirps is not an array")?
        .iter()
        .map(|chirp| chirp["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(contents, ["hello", "seeded on b", "live on b"]);

    let index = http(&addr, "GET /", "").await?;
    assert!(index.ends_with("<title>Chirply</title>"), "{index}");

    // Once the peer is gone its slot turns into an error entry.
    let _ = peer_child.kill().await;
    let _ = peer_child.wait().await;
    let degraded = http(&addr, "GET /chirps", "").await?;
    assert!(degraded.starts_with("HTTP/1.1 200 OK\r\n"), "{degraded}");
    assert!(
        degraded.contains(&format!("Unable to fetch chirps from {peer_addr}")),
        "{degraded}"
    );

    let _ = child.kill().await;
    let _ = child.wait().await;
    let _ = log_task.await;
    let _ = peer_log_task.await;

    Ok(())
}

async fn spawn_node(
    binary: &Path,
    document_root: &Path,
    extra: &[&str],
) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("--listen")
        .arg("127.0.0.1:0")
        .arg("--document-root")
        .arg(document_root)
        .arg("--peer-timeout-ms")
        .arg("500")
        .args(extra)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn chirp node")?;
    let stdout = child
        .stdout
        .take()
        .context("node stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

/// The first log line announces the bound address as its last word.
async fn read_listen_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let mut line = String::new();
    let read = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("timed out waiting for listening banner"))??;
    if read == 0 {
        return Err(anyhow!("node exited before announcing its address"));
    }

    let addr = line
        .split_whitespace()
        .last()
        .context("unexpected banner format")?
        .trim_matches(|c: char| !c.is_ascii_digit());
    if !addr.contains(':') {
        return Err(anyhow!("banner missing socket address: {}", line.trim()));
    }
    Ok(addr.to_string())
}

/// Sends one request on a fresh connection and returns the raw response.
async fn http(addr: &str, request_line: &str, body: &str) -> Result<String> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let request = format!(
        "{request_line} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await?;
    // Half-close so the server sees the end of the conversation after answering.
    stream.shutdown().await?;

    let mut response = String::new();
    timeout(READ_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .map_err(|_| anyhow!("timed out waiting for response from {addr}"))??;
    Ok(response)
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
