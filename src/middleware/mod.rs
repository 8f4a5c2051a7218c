pub mod api_key;

pub use api_key::{hash_api_key, require_api_key, ApiKeyContext};
