use std::collections::VecDeque;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// Base64 of `img`; what every successful image call returns.
pub const STUB_IMAGE: &str = "aW1n";

#[derive(Debug, Clone, Default)]
pub struct ProviderStubConfig {
    /// Statuses the chat endpoint answers with, in order, before succeeding.
    pub chat_failures: Vec<u16>,
    /// Message content of a successful chat completion.
    pub story_content: String,
    /// 1-based image call number that answers 500. The cover is call 1.
    pub failing_image_call: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

pub struct ProviderStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ProviderStub {
    pub fn spawn(config: ProviderStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start provider stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/api/v1");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut chat_failures: VecDeque<u16> = config.chat_failures.iter().copied().collect();
            let mut image_calls = 0usize;

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
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.to_string());
                let mut raw = String::new();
                if request.as_reader().read_to_string(&mut raw).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let body: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
                recorded.lock().unwrap().push(RecordedRequest {
                    path: path.clone(),
                    authorization,
                    body,
                });

                let response = match path.as_str() {
                    "/api/v1/chat/completions" => match chat_failures.pop_front() {
                        Some(status) => json_response(
                            status,
                            serde_json::json!({ "error": { "message": format!("stub {status}") } }),
                        ),
                        None => json_response(
                            200,
                            serde_json::json!({
                                "choices": [
                                    { "message": { "role": "assistant", "content": config.story_content } }
                                ]
                            }),
                        ),
                    },
                    "/api/v1/image/generate" => {
                        image_calls += 1;
                        if config.failing_image_call == Some(image_calls) {
                            json_response(500, serde_json::json!({ "error": "stub image failure" }))
                        } else {
                            json_response(200, serde_json::json!({ "images": [STUB_IMAGE] }))
                        }
                    }
                    "/api/v1/audio/speech" => {
                        tiny_http::Response::from_data(b"ID3stub".to_vec()).with_status_code(200)
                    }
                    _ => tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(404),
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

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(suffix))
            .collect()
    }
}

impl Drop for ProviderStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_data(body.to_string().into_bytes())
        .with_status_code(status)
        .with_header(header)
}

/// Story JSON the way models tend to send it: fenced, with a trailing comma.
pub fn fenced_story(title: &str, pages: usize) -> String {
    let pages: Vec<String> = (1..=pages)
        .map(|n| {
            format!(
                r#"{{"pageNumber": {n}, "text": "Page {n} of the story.", "imageDescription": "scene {n}"}}"#
            )
        })
        .collect();
    format!(
        "Here is your story:\n```json\n{{\"title\": \"{title}\", \"characters\": {{\"main\": \"a small blue robot with round eyes\", \"others\": []}}, \"pages\": [{}],}}\n```\n",
        pages.join(", ")
    )
}
