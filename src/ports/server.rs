//! Port for HTTP(S) server lifecycle (§4.10), mirroring the teacher's
//! `HttpServer`/`HttpHandler` port shape.
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;

pub type ServerRunFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A named, independently startable/stoppable listener.
pub trait ManagedServer: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn run<'a>(&'a self) -> ServerRunFuture<'a>;
    fn shutdown<'a>(&'a self) -> ServerRunFuture<'a>;
}
