pub mod auth;
pub mod catalog;
pub mod error;
pub mod handlers;
pub mod server;
pub mod session;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: catalog::Catalog,
}

pub use catalog::Catalog;
pub use error::CatalogError;
pub use server::{open_store, resolve_data_dir, router, run, ServerConfig, StorageKind};
