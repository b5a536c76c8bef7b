use crate::error::KvError;
use crate::replication::VectorClock;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::debug;

/// A client session. Carries the causal context summarising everything
/// this client has observed; every reply's context replaces the stored
/// one, so any replica whose frontier covers it can serve the next
/// request.
pub struct Session {
    name: String,
    address: String,
    context: VectorClock,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Session {
            name: name.into(),
            address: address.into(),
            context: VectorClock::new(),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Point the session at another replica. The context travels with the
    /// session, not the replica.
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    pub fn context(&self) -> &VectorClock {
        &self.context
    }

    /// Read a key. `ContextUnsatisfied` means the replica has not caught
    /// up to this session yet; wait and retry, or try another replica.
    pub async fn read(&mut self, key: &str) -> Result<String, KvError> {
        let result = self
            .transport
            .read(&self.name, &self.address, key, &self.context)
            .await;
        match result {
            Ok((value, context)) => {
                self.context = context;
                Ok(value)
            }
            Err(KvError::NotFound { key, context }) => {
                // A miss with a satisfied context still carries one.
                self.context = self.context.take_max(&context);
                Err(KvError::NotFound { key, context })
            }
            Err(err) => {
                debug!(client = %self.name, key, %err, "read failed");
                Err(err)
            }
        }
    }

    pub async fn write(&mut self, key: &str, value: &str) -> Result<(), KvError> {
        let result = self
            .transport
            .write(&self.name, &self.address, key, value, &self.context)
            .await;
        match result {
            Ok(context) => {
                self.context = context;
                Ok(())
            }
            Err(err) => {
                debug!(client = %self.name, key, %err, "write failed");
                Err(err)
            }
        }
    }
}
