//! # Handler Module
//!
//! The request handler collaborator injected into every adapter.
//!
//! Engines translate their native request type into an [`HttpRequest`], call
//! [`RequestHandler::handle`], and write the returned [`HttpResponse`] back in
//! their own wire format. The supervisor never looks inside a handler.
//!
//! Any `Fn(&HttpRequest) -> HttpResponse + Send + Sync` closure is a handler:
//!
//! ```rust
//! use brrtsupervisor::handler::{HttpRequest, HttpResponse, RequestHandler};
//!
//! let hello = |req: &HttpRequest| {
//!     if req.path == "/" {
//!         HttpResponse::ok_text("hello")
//!     } else {
//!         HttpResponse::not_found()
//!     }
//! };
//! # let _ = &hello as &dyn RequestHandler;
//! ```

mod echo;
mod request;
mod response;

pub use echo::EchoHandler;
pub use request::{parse_query, HttpRequest};
pub use response::{status_reason, HttpResponse};

/// Opaque request handler shared by all engine worker contexts.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, req: &HttpRequest) -> HttpResponse;
}

impl<F> RequestHandler for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, req: &HttpRequest) -> HttpResponse {
        self(req)
    }
}
