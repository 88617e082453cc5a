//! Per-request context handed to route handlers and middleware.

use crate::Request;

/// Value recorded when no forwarding header names the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Per-request context wrapping the parsed [`Request`].
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    /// The originating client address: the first `X-Forwarded-For` hop, or
    /// [`UNKNOWN_CLIENT`].
    pub fn client_ip(&self) -> String {
        self.request
            .headers()
            .first_token("x-forwarded-for")
            .unwrap_or(UNKNOWN_CLIENT)
            .to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(raw: &str) -> Context {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    #[test]
    fn client_ip_from_forwarded_header() {
        let c = ctx("POST /api/rate HTTP/1.1\r\nX-Forwarded-For: 198.51.100.4, 10.0.0.1\r\n\r\n");
        assert_eq!(c.client_ip(), "198.51.100.4");
    }

    #[test]
    fn client_ip_defaults_to_unknown() {
        let c = ctx("POST /api/rate HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(c.client_ip(), UNKNOWN_CLIENT);
    }

    #[test]
    fn json_body() {
        let c = ctx("POST /api/rate HTTP/1.1\r\nContent-Length: 8\r\n\r\n{\"a\": 1}");
        let value: serde_json::Value = c.json().unwrap();
        assert_eq!(value["a"], 1);
    }
}
