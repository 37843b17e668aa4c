use std::collections::HashMap;

/// Engine-neutral view of an incoming HTTP request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Parsed query string parameters
    pub query: HashMap<String, String>,
    /// HTTP headers (lowercase keys)
    pub headers: HashMap<String, String>,
    /// Raw request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Build a request from a raw request target such as `/users?limit=10`.
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let path = target.split('?').next().unwrap_or("/").to_string();
        Self {
            method: method.into(),
            path,
            query: parse_query(target),
            ..Default::default()
        }
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Parse query string parameters from a request target
///
/// Extracts everything after the `?` character and URL-decodes parameter names and values.
pub fn parse_query(target: &str) -> HashMap<String, String> {
    match target.find('?') {
        Some(pos) => url::form_urlencoded::parse(target[pos + 1..].as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => HashMap::new(),
    }
}
