//! Request identity for cache entries.

use sha2::{Digest, Sha256};
use url::Url;

/// Stable key for a GET request to `url`.
///
/// The fragment never reaches the server, so it is not part of the identity.
pub fn request_key(url: &str) -> String {
  let normalized = match Url::parse(url) {
    Ok(mut parsed) => {
      parsed.set_fragment(None);
      parsed.to_string()
    }
    Err(_) => url.to_string(),
  };

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(normalized.as_bytes());
  hex::encode(hasher.finalize())
}
