//! Edge reverse proxy library: a filter pipeline in front of retrying origin proxying.

// Per-request core
pub mod attempts;
pub mod context;
pub mod filters;
pub mod message;
pub mod passport;
pub mod proxy;

// Origins and traffic management
pub mod health;
pub mod load_balancer;
pub mod origin;
pub mod routing;

// Transport
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use filters::FilterProcessor;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::ProxyEndpoint;
