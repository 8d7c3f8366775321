//! Raw resource factory trait.
//!
//! The pool never constructs or disposes of a raw resource itself; it asks
//! its [`Resource`] implementation to.

use std::future::Future;

use crate::error::Result;

/// Factory for the raw resources a [`Pool`](crate::Pool) manages.
///
/// ```rust,ignore
/// struct Postgres { url: String }
///
/// impl Resource for Postgres {
///     type Instance = PgConnection;
///
///     fn id(&self) -> &str { "postgres" }
///
///     async fn create(&self) -> Result<PgConnection> {
///         PgConnection::connect(&self.url)
///             .await
///             .map_err(|e| Error::creation_from("postgres", e))
///     }
/// }
/// ```
pub trait Resource: Send + Sync + 'static {
    /// The raw resource type handed to borrowers.
    type Instance: Send + Sync + 'static;

    /// Unique name for this resource (e.g. "postgres", "redis").
    /// Used as the pool name in logs, events and the registry.
    fn id(&self) -> &str;

    /// Create a new raw instance.
    fn create(&self) -> impl Future<Output = Result<Self::Instance>> + Send;

    /// Dispose of an instance that is leaving the pool for good.
    fn cleanup(&self, instance: Self::Instance) -> impl Future<Output = Result<()>> + Send {
        drop(instance);
        async { Ok(()) }
    }
}
