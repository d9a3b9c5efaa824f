//! Secret source implementations
//!
//! A source hands back the raw text of a salt API response. Parsing and validation
//! happen later in [`crate::parser`].

mod http;
mod secret_source;

pub use http::HttpSource;
pub use secret_source::SecretSource;

/// Type alias for source trait object
pub type Source = Box<dyn SecretSource>;
