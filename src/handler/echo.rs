use super::{HttpRequest, HttpResponse, RequestHandler};
use serde_json::json;

/// Built-in handler: answers `/health` and echoes everything else back as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, req: &HttpRequest) -> HttpResponse {
        if req.method == "GET" && req.path == "/health" {
            return HttpResponse::ok_json(&json!({ "status": "ok" }));
        }
        HttpResponse::ok_json(&json!({
            "method": req.method,
            "path": req.path,
            "query": req.query,
            "body": String::from_utf8_lossy(&req.body),
        }))
    }
}
