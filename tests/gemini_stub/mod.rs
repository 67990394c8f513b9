use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum ModelBehavior {
    /// Every call succeeds with this text.
    Succeed(String),
    /// The first `failures` calls answer 503, then calls succeed.
    TransientThenSucceed { failures: usize, text: String },
    /// Every call answers 400 with this message.
    Permanent(String),
}

#[derive(Debug, Clone, Default)]
pub struct GeminiStubConfig {
    /// Behavior per fully-qualified model name ("models/…").
    pub behaviors: HashMap<String, ModelBehavior>,
}

impl GeminiStubConfig {
    #[allow(dead_code)]
    pub fn with_behavior(mut self, model: &str, behavior: ModelBehavior) -> Self {
        self.behaviors.insert(model.to_string(), behavior);
        self
    }
}

/// Generative-provider stub: `:generateContent` per scripted model behavior,
/// plus `/v1/models` and `/v1beta/models` listings for diagnostics.
pub struct GeminiStub {
    pub base_url: String,
    calls: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GeminiStub {
    pub fn spawn(config: GeminiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start gemini stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut counts: HashMap<String, usize> = HashMap::new();
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
                let path = url.split('?').next().unwrap_or(&url).to_string();

                if path == "/v1/models" || path == "/v1beta/models" {
                    let listing = serde_json::json!({
                        "models": [ { "name": "models/gemini-2.5-flash" } ]
                    });
                    let _ = request.respond(json_response(200, &listing));
                    continue;
                }

                let Some(model) = model_from_path(&path) else {
                    let _ = request.respond(json_response(
                        404,
                        &serde_json::json!({ "error": { "message": "unknown endpoint" } }),
                    ));
                    continue;
                };

                seen.lock().unwrap().push(model.clone());
                let count = counts.entry(model.clone()).or_insert(0);
                *count += 1;

                let (status, body) = match config.behaviors.get(&model) {
                    Some(ModelBehavior::Succeed(text)) => (200, success_body(text)),
                    Some(ModelBehavior::TransientThenSucceed { failures, text }) => {
                        if *count <= *failures {
                            (503, overloaded_body())
                        } else {
                            (200, success_body(text))
                        }
                    }
                    Some(ModelBehavior::Permanent(message)) => (400, permanent_body(message)),
                    None => (400, permanent_body("no behavior scripted for this model")),
                };
                let _ = request.respond(json_response(status, &body));
            }
        });

        Self {
            base_url,
            calls,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Model names in generation-call order.
    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Drop for GeminiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn model_from_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/v1beta/")?;
    let model = rest.strip_suffix(":generateContent")?;
    Some(model.to_string())
}

fn success_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [
            {
                "content": { "role": "model", "parts": [ { "text": text } ] },
                "finishReason": "STOP"
            }
        ]
    })
}

fn overloaded_body() -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": 503,
            "message": "The model is overloaded. Please try again later.",
            "status": "UNAVAILABLE"
        }
    })
}

fn permanent_body(message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": { "code": 400, "message": message, "status": "INVALID_ARGUMENT" }
    })
}

fn json_response(status: u16, body: &serde_json::Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .expect("build header"),
        )
}
