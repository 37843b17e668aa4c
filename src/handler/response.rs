use serde_json::Value;

/// Engine-neutral HTTP response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into().into_bytes(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    pub fn ok_text(body: impl Into<String>) -> Self {
        Self::text(200, body)
    }

    pub fn ok_json(body: &Value) -> Self {
        Self::json(200, body)
    }

    pub fn not_found() -> Self {
        Self::json(404, &serde_json::json!({ "error": "Not Found" }))
    }
}

/// Reason phrase for the status codes handlers commonly return.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(503), "Service Unavailable");
    }

    #[test]
    fn test_not_found_is_json() {
        let res = HttpResponse::not_found();
        assert_eq!(res.status, 404);
        assert_eq!(res.content_type, "application/json");
    }
}
