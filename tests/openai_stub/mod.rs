use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct OpenAiStubConfig {
    /// The first N requests are answered with HTTP 429.
    pub rate_limited_requests: usize,
    /// Answer outline requests with prose instead of a JSON plan.
    pub broken_outline: bool,
}

pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn(config: OpenAiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");

        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post || path != "/v1/responses" {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let count = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if count <= config.rate_limited_requests {
                    let _ = request.respond(json_response(
                        429,
                        &serde_json::json!({
                            "error": { "message": "Rate limit reached", "type": "requests" }
                        }),
                    ));
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let Some(prompt) = parsed.get("input").and_then(|v| v.as_str()) else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("missing input").with_status_code(400),
                    );
                    continue;
                };

                let output_text = if prompt.contains("Return ONLY a JSON array") {
                    if config.broken_outline {
                        "Here is a lovely outline, in prose.".to_owned()
                    } else {
                        outline_response(prompt)
                    }
                } else {
                    let first = prompt
                        .lines()
                        .map(str::trim)
                        .find(|line| !line.is_empty())
                        .unwrap_or("");
                    format!("Stub text for: {first}")
                };

                let response_body = serde_json::json!({
                    "id": "resp_stub",
                    "object": "response",
                    "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                    "output": [
                        {
                            "type": "message",
                            "role": "assistant",
                            "content": [
                                { "type": "output_text", "text": output_text }
                            ]
                        }
                    ]
                });
                let _ = request.respond(json_response(200, &response_body));
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Requests received so far, including rate-limited ones.
    #[allow(dead_code)]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header)
}

/// Reads `Exactly N chapters, each with exactly K subsections` from the
/// prompt and answers with a plan of that shape.
fn outline_response(prompt: &str) -> String {
    let counts = prompt
        .lines()
        .find_map(|line| {
            let rest = line.trim().strip_prefix("- Exactly ")?;
            let (chapters, rest) = rest.split_once(" chapters, each with exactly ")?;
            let (subsections, _) = rest.split_once(' ')?;
            Some((chapters.parse::<usize>().ok()?, subsections.parse::<usize>().ok()?))
        })
        .unwrap_or((1, 1));

    let mut plan = vec![
        serde_json::json!({"title": "Preface", "type": "preface", "subsections": []}),
        serde_json::json!({"title": "Introduction", "type": "introduction", "subsections": []}),
    ];
    for i in 1..=counts.0 {
        plan.push(serde_json::json!({
            "title": format!("Chapter {i}: Stub Chapter"),
            "type": "chapter",
            "subsections": (1..=counts.1).map(|j| format!("Stub Subsection {j}")).collect::<Vec<_>>(),
            "description": "Stub description.",
        }));
    }
    plan.push(serde_json::json!({"title": "Conclusion", "type": "conclusion", "subsections": []}));

    format!("```json\n{}\n```", Value::Array(plan))
}
