use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// Minimal canned-response HTTP listener standing in for the speech service
/// (or for an unrelated squatter on its port).
pub(crate) struct HttpStub {
    port: u16,
    handle: JoinHandle<()>,
}

impl HttpStub {
    /// Serve fixed `(path, status, body)` responses; unknown paths get 404.
    pub(crate) async fn serve(routes: Vec<(&'static str, u16, String)>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.split();
                    let mut lines = BufReader::new(read).lines();
                    let Ok(Some(request_line)) = lines.next_line().await else {
                        return;
                    };
                    // Drain headers up to the blank line.
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line.is_empty() {
                            break;
                        }
                    }

                    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, s, b)| (*s, b.clone()))
                        .unwrap_or((404, "{}".to_string()));
                    let reason = if status == 200 { "OK" } else { "Error" };

                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\n\
                         content-type: application/json\r\n\
                         content-length: {}\r\n\
                         connection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = write.write_all(response.as_bytes()).await;
                    let _ = write.shutdown().await;
                });
            }
        });

        Self { port, handle }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
