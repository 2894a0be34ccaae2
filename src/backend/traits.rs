use tokio::sync::mpsc::{Receiver, Sender};

use super::protocol::{BackendEvent, RunMessage};
use crate::registry::RuntimeDescriptor;

/// Message channels to one isolated execution environment.
///
/// Dropping the channel is the fire-and-forget termination signal: the
/// environment observes its closed command stream and tears itself down
/// within its own grace period.
#[derive(Debug)]
pub struct BackendChannel {
    pub commands: Sender<RunMessage>,
    pub events: Receiver<BackendEvent>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to provision runtime \"{runtime}\": {msg}")]
    Failed { runtime: String, msg: String },

    #[error("runtime \"{0}\" has no offloaded back-end")]
    Unsupported(String),
}

/// Provisions execution environments for the pool.
///
/// May suspend: provisioning a runtime can involve downloading and
/// initializing a large interpreter asset.
#[mockall::automock]
#[async_trait::async_trait]
pub trait BackendLauncher: std::fmt::Debug + Send + Sync {
    async fn launch(&self, descriptor: &RuntimeDescriptor)
    -> Result<BackendChannel, ProvisionError>;
}
