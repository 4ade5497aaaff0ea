// Public API - what other modules can use
pub use resolver::{IdentityResolver, JwtIdentityResolver};
pub use token::TokenConfig;
pub use types::{Identity, IdentityClaims};

// Internal modules
mod resolver;
mod token;
mod types;
