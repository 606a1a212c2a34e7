//! The actual git subprocess wrapper is out of scope here; `WorktreeTracker`
//! only owns the state machine and delegates every branch operation to an
//! injected [`GitRunner`] (`spec.md` §4.11).

use async_trait::async_trait;
use meridian_shared::MeridianError;
use std::path::Path;

#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, args: &[&str], cwd: &Path) -> Result<String, MeridianError>;
}
