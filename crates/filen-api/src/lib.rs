//! filen-api: thin, retrying client for the backend HTTP API
//!
//! The JSON gateway carries metadata operations; chunk bodies travel raw over
//! the ingest (PUT) and egest (GET) endpoints. Everything the rest of the
//! client needs is expressed through the [`Backend`] trait so the transfer
//! engine and orchestrator run unchanged against [`HttpBackend`] or the
//! in-memory [`MemoryBackend`] used in tests.

pub mod backend;
pub mod http;
pub mod mem;
pub mod retry;
pub mod types;

pub use backend::{Backend, DirSelector, ItemKind};
pub use http::HttpBackend;
pub use mem::MemoryBackend;
