/// Best-effort event sink for a streamer. A reporter is optional; a
/// streamer must never let a reporter failure interrupt the pipeline
/// (§4.B) — implementations that can fail should log and swallow the
/// error themselves.
pub trait Reporter: Send + Sync {
    /// `name` is the emitting streamer's name, `kind` is a short event tag
    /// (e.g. `"ChunkSize"`, `"close"`), and `value` is the JSON-ish payload
    /// (see `Packet::dump`).
    fn on_report(&self, name: &str, kind: &str, value: &str);
}

/// A [`Reporter`] that forwards every event to `tracing` at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn on_report(&self, name: &str, kind: &str, value: &str) {
        tracing::info!(streamer = name, event = kind, payload = value, "reported event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct RecordingReporter {
        events: RefCell<Vec<(String, String, String)>>,
    }

    impl Reporter for RecordingReporter {
        fn on_report(&self, name: &str, kind: &str, value: &str) {
            self.events.borrow_mut().push((name.to_string(), kind.to_string(), value.to_string()));
        }
    }

    #[test]
    fn recording_reporter_captures_events() {
        let reporter = RecordingReporter { events: RefCell::new(Vec::new()) };
        reporter.on_report("mp4-demux", "close", "{}");
        assert_eq!(reporter.events.borrow().len(), 1);
        assert_eq!(reporter.events.borrow()[0].1, "close");
    }
}
