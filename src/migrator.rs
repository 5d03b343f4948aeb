use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// User-supplied data-transfer hook.
///
/// Invoked once per migration plan after the ring's ownership accounting has
/// already been rewritten in the store. The router logs and swallows errors:
/// retrying the physical transfer is the operator's responsibility, the
/// accounting will not be rolled back.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, keys: HashSet<String>, from: &str, to: &str) -> Result<()>;
}
