pub mod handlers;
pub mod mappers;
pub mod memory;
pub mod middleware;
pub mod server;
pub mod signature_cache;
pub mod state;
pub mod token;
pub mod upstream;

pub use signature_cache::SignatureCache;
pub use state::{AppState, CoreServices};
pub use token::manager::TokenManager;
