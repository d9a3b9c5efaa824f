//! WordPress Salt Rotation Library
//!
//! Fetches fresh authentication keys and salts and rewrites them into wp-config.php,
//! with a backup before every change and a lock against overlapping rotations.

pub mod cli;
pub mod config;
pub mod define;
pub mod error;
pub mod keys;
pub mod parser;
pub mod rewriter;
pub mod rotation;
pub mod schedule;
pub mod sources;

pub use config::Config;
pub use error::{RestoreStatus, RotationError};
pub use keys::SecretKey;
pub use parser::{parse, SecretBundle, SecretDefinition};
pub use rewriter::ConfigRewriter;
pub use rotation::{Outcome, RotationResult, Rotator};
