use super::{ProgressEvent, ProgressHandler};
use std::sync::Mutex;

/// Keeps every event, for assertions in tests
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events concerning one target, in emission order
    pub fn events_for(&self, id: &str) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.target() == Some(id))
            .collect()
    }
}

impl ProgressHandler for RecordingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let handler = RecordingHandler::new();
        handler.on_progress(&ProgressEvent::TargetGenerating { id: "a".into() });
        handler.on_progress(&ProgressEvent::TargetGenerating { id: "b".into() });
        handler.on_progress(&ProgressEvent::TargetBuilding { id: "a".into() });

        assert_eq!(handler.events().len(), 3);
        assert_eq!(
            handler.events_for("a"),
            vec![
                ProgressEvent::TargetGenerating { id: "a".into() },
                ProgressEvent::TargetBuilding { id: "a".into() },
            ]
        );
    }
}
