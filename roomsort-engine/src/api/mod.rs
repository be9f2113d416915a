//! HTTP API handlers for roomsort-engine

pub mod health;
pub mod requests;
pub mod sse;

pub use health::health_routes;
pub use requests::request_routes;
pub use sse::event_stream;
