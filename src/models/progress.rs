use serde::ser::{Serialize, SerializeMap, Serializer};

/// Message published on a plan's progress channel.
///
/// Serialises to the wire shapes the optimizing page listens for:
/// `{"type":"progress",..}`, `{"type":"redirect",..}`,
/// `{"status":"completed"}` and `{"status":"failed",..}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress { progress: u8, phase_message: String },
    Redirect { redirect_path: String },
    Completed,
    Failed { phase_message: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Completed | ProgressEvent::Failed { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Serialize for ProgressEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProgressEvent::Progress {
                progress,
                phase_message,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "progress")?;
                map.serialize_entry("progress", progress)?;
                map.serialize_entry("phase_message", phase_message)?;
                map.end()
            }
            ProgressEvent::Redirect { redirect_path } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "redirect")?;
                map.serialize_entry("redirect_path", redirect_path)?;
                map.end()
            }
            ProgressEvent::Completed => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("status", "completed")?;
                map.end()
            }
            ProgressEvent::Failed { phase_message } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("status", "failed")?;
                map.serialize_entry("phase_message", phase_message)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_wire_shape() {
        let event = ProgressEvent::Progress {
            progress: 40,
            phase_message: "Optimizing allocation".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(
            value,
            json!({"type": "progress", "progress": 40, "phase_message": "Optimizing allocation"})
        );
    }

    #[test]
    fn terminal_wire_shapes() {
        let completed: serde_json::Value =
            serde_json::from_str(&ProgressEvent::Completed.to_json()).unwrap();
        assert_eq!(completed, json!({"status": "completed"}));

        let failed = ProgressEvent::Failed {
            phase_message: "Weather fetch failed".into(),
        };
        let failed: serde_json::Value = serde_json::from_str(&failed.to_json()).unwrap();
        assert_eq!(
            failed,
            json!({"status": "failed", "phase_message": "Weather fetch failed"})
        );
    }

    #[test]
    fn redirect_is_not_terminal() {
        let redirect = ProgressEvent::Redirect {
            redirect_path: "/plans/1/schedule".into(),
        };
        assert!(!redirect.is_terminal());
        assert!(ProgressEvent::Completed.is_terminal());
    }
}
