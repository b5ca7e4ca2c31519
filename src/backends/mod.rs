//! Background removal backends
//!
//! Removal is delegated to an external service. The pipeline only talks to the
//! [`RemovalBackend`] trait so the HTTP client can be swapped for a scripted
//! backend in tests or a different provider.

pub mod remove_bg;

pub use self::remove_bg::RemoveBgClient;

use crate::error::Result;
use async_trait::async_trait;

/// A service that turns an image into a cutout with a transparent background
#[async_trait]
pub trait RemovalBackend: Send + Sync {
    /// Send one image and return the encoded cutout
    ///
    /// Implementations make exactly one attempt; retries are the caller's decision.
    ///
    /// # Errors
    /// - `Network` when the service cannot be reached
    /// - `Auth` when the credential is rejected
    /// - `Quota` when credits or rate limits are exhausted
    /// - `Service` for any other error response or unusable body
    async fn remove(&self, image: &[u8]) -> Result<Vec<u8>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
