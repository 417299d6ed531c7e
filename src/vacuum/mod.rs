pub mod commands;
pub mod device;
pub mod fields;
pub mod intent;
pub mod state;

pub use device::Vacuum;
pub use intent::Intent;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;

    use crate::error::TransportError;
    use crate::tuya::DpsTransport;

    /// In-memory transport that records every write.
    #[derive(Default)]
    pub struct Recorder {
        sent: Mutex<Vec<(u32, Value)>>,
        fail: AtomicBool,
    }

    impl Recorder {
        pub fn sent(&self) -> Vec<(u32, Value)> {
            self.sent.lock().clone()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }

        pub fn fail_sends(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DpsTransport for Recorder {
        async fn send(&self, field_code: u32, value: Value) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Send("device unreachable".into()));
            }
            self.sent.lock().push((field_code, value));
            Ok(())
        }
    }
}
