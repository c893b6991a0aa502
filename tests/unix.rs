#![cfg(unix)]

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use tether::proxy::ProxyEnvironment;
use tether::{Builder, RequestParams};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::test]
async fn request_over_unix_socket() -> Result<(), BoxError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tether.sock");
    let listener = UnixListener::bind(&path)?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut head = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line == "\r\n" || line.is_empty() {
                break;
            }
            head.push(line.trim_end().to_owned());
        }
        write
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsocket")
            .await?;
        Ok::<_, std::io::Error>(head)
    });

    let mut connection = Builder::unix(&path)
        .with_proxy_environment(ProxyEnvironment::default())
        .build()?;
    let response = connection.request(RequestParams::get("/status")).await?;
    assert_eq!(response.body(), "socket");

    let head = server.await??;
    assert_eq!(head[0], "GET /status HTTP/1.1");
    let host = format!("Host: {}", path.display());
    assert!(head.iter().any(|line| *line == host));
    Ok(())
}
