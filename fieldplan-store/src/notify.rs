// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification seam towards external delivery channels.
//!
//! The workflow engines announce assignments and state changes here. Concrete delivery
//! (messengers, push services) lives outside this crate; failures are logged and swallowed so a
//! broken channel can never fail or block the originating mutation.
use std::error::Error;

use fieldplan_core::AgentId;
use tracing::{debug, warn};

/// Interface for dispatching a notification to a single agent.
pub trait Notifier {
    type Error: Error;

    /// Deliver an event with a human-readable payload to an agent.
    fn notify(
        &self,
        agent: &AgentId,
        event: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Fire a notification, logging and swallowing any delivery failure.
pub(crate) async fn dispatch<N: Notifier>(
    notifier: &N,
    agent: &AgentId,
    event: &str,
    payload: &str,
) {
    if let Err(err) = notifier.notify(agent, event, payload).await {
        // Send errors are never reported up the chain.
        warn!(%agent, event, %err, "notification delivery failed");
    }
}

/// Notifier which only logs. Useful as a default and for deployments without any channel
/// configured.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    type Error = std::convert::Infallible;

    async fn notify(
        &self,
        agent: &AgentId,
        event: &str,
        payload: &str,
    ) -> Result<(), Self::Error> {
        debug!(%agent, event, payload, "notification");
        Ok(())
    }
}

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils {
    use std::sync::{Arc, Mutex};

    use fieldplan_core::AgentId;

    use super::Notifier;

    /// Records every dispatched notification for assertions.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingNotifier {
        events: Arc<Mutex<Vec<(AgentId, String, String)>>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<(AgentId, String, String)> {
            self.events.lock().expect("notifier lock poisoned").clone()
        }
    }

    impl Notifier for RecordingNotifier {
        type Error = std::convert::Infallible;

        async fn notify(
            &self,
            agent: &AgentId,
            event: &str,
            payload: &str,
        ) -> Result<(), Self::Error> {
            self.events
                .lock()
                .expect("notifier lock poisoned")
                .push((agent.clone(), event.to_string(), payload.to_string()));
            Ok(())
        }
    }
}
