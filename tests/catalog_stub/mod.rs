use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

/// Serves canned JSON bodies keyed by exact request URL (path + query) and
/// records every URL it was asked for. One stub can stand in for the books,
/// Open Library, and covers upstreams at once since their paths never clash.
pub struct CatalogStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CatalogStub {
    pub fn spawn(routes: HashMap<String, (u16, serde_json::Value)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start catalog stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                seen.lock().unwrap().push(url.clone());

                let response = match routes.get(&url) {
                    Some((status, body)) => tiny_http::Response::from_string(body.to_string())
                        .with_status_code(*status)
                        .with_header(json_header()),
                    None => tiny_http::Response::from_string(r#"{"error":"not found"}"#)
                        .with_status_code(404)
                        .with_header(json_header()),
                };
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    #[allow(dead_code)]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn hits_with_prefix(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.starts_with(prefix))
            .count()
    }
}

impl Drop for CatalogStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_header() -> tiny_http::Header {
    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header")
}
