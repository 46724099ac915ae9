use livecheck_core::Status;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};

pub const BUS_NAME: &str = "org.livecheck.Verifier1";
pub const OBJECT_PATH: &str = "/org/livecheck/Verifier1";

/// D-Bus interface for the liveness verification daemon.
///
/// Bus name: org.livecheck.Verifier1
/// Object path: /org/livecheck/Verifier1
///
/// Every method returns the session status as a JSON object.
pub struct VerifierService {
    engine: EngineHandle,
}

impl VerifierService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.livecheck.Verifier1")]
impl VerifierService {
    /// Open the camera and begin a new verification.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        to_reply(self.engine.start().await)
    }

    /// Confirm a blink once the automatic check has timed out.
    async fn confirm_blink(&self) -> zbus::fdo::Result<String> {
        tracing::info!("blink confirmation requested");
        to_reply(self.engine.confirm_blink().await)
    }

    /// Confirm head movement once the automatic check has timed out.
    async fn confirm_movement(&self) -> zbus::fdo::Result<String> {
        tracing::info!("movement confirmation requested");
        to_reply(self.engine.confirm_movement().await)
    }

    /// Start the capture countdown of a completed verification.
    async fn take_photo(&self) -> zbus::fdo::Result<String> {
        tracing::info!("photo requested");
        to_reply(self.engine.take_photo().await)
    }

    /// Save a retained photo again after a failed save.
    async fn retry_save(&self) -> zbus::fdo::Result<String> {
        tracing::info!("save retry requested");
        to_reply(self.engine.retry_save().await)
    }

    /// Abort the session and release the camera.
    async fn reset(&self) -> zbus::fdo::Result<String> {
        tracing::info!("reset requested");
        to_reply(self.engine.reset().await)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        to_reply(self.engine.status().await)
    }
}

fn to_reply(result: Result<Status, EngineError>) -> zbus::fdo::Result<String> {
    let status = result.map_err(|e| {
        tracing::warn!(error = %e, "request failed");
        zbus::fdo::Error::Failed(e.to_string())
    })?;
    serde_json::to_string(&status).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecheck_core::VerificationSession;

    #[test]
    fn test_reply_is_status_json() {
        let status = VerificationSession::new().status();
        let json: serde_json::Value = serde_json::from_str(&to_reply(Ok(status)).unwrap()).unwrap();
        assert_eq!(json["step"], "idle");
        assert_eq!(json["manual_confirm_available"], false);
        assert!(json["saved"].is_null());
    }

    #[test]
    fn test_errors_map_to_failed() {
        let err = to_reply(Err(EngineError::ChannelClosed)).unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::Failed(m) if m.contains("engine thread exited")));
    }
}
