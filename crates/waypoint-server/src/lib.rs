pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use bootstrap::{BootstrapConfig, SeedClient, SeedReport, SeedUser};
pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use handlers::DomainState;
pub use observability::init_tracing;
pub use server::{
    BACKEND_REGISTRATION, ServerBuilder, Services, WaypointServer, build_app, security_chains,
};
