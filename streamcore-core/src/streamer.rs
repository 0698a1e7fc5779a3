use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::StreamerError;
use crate::packet::Packet;
use crate::reporter::Reporter;

/// The minimal capability every node in the pipeline graph has: a name and
/// the ability to receive packets. `source_data` is synchronous and must
/// never block on network I/O (§4.B, §5) — it may call a downstream
/// sinker's `source_data` before returning.
pub trait Sinker: Send + Sync {
    fn streamer_name(&self) -> &str;

    fn source_data(&self, packet: Arc<Packet>) -> Result<(), StreamerError>;
}

/// The full capability set of a named pipeline node (§4.B): wiring
/// (`add_sinker`/`remove_sinker`), configuration (`add_option`), and a
/// best-effort event reporter. `start_network`/`stop_network` are the
/// optional network lifecycle hooks — a streamer with no network
/// component (e.g. a pure transform) may leave them at their default,
/// which reports unsupported.
pub trait Streamer: Sinker {
    fn add_sinker(&self, sinker: Arc<dyn Sinker>);

    fn remove_sinker(&self, name: &str) -> usize;

    fn add_option(&self, key: &str, value: &str) -> Result<(), StreamerError>;

    fn set_reporter(&self, reporter: Arc<dyn Reporter>);

    fn start_network(&self, _url: &str, _rt: Option<tokio::runtime::Handle>) -> Result<(), StreamerError> {
        Err(StreamerError::UnknownOption { key: "start_network".into() })
    }

    fn stop_network(&self) -> Result<(), StreamerError> {
        Ok(())
    }
}

/// Fanout helper embedded by every concrete `Streamer` to implement
/// `add_sinker`/`remove_sinker`/dispatch without re-deriving the locking
/// discipline each time. `add_sinker` by the same name overwrites (§4.B).
#[derive(Default)]
pub struct SinkerFanout {
    sinkers: Mutex<HashMap<String, Arc<dyn Sinker>>>,
}

impl SinkerFanout {
    pub fn new() -> Self {
        SinkerFanout { sinkers: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, sinker: Arc<dyn Sinker>) {
        let name = sinker.streamer_name().to_string();
        self.sinkers.lock().unwrap().insert(name, sinker);
    }

    pub fn remove(&self, name: &str) -> usize {
        if self.sinkers.lock().unwrap().remove(name).is_some() {
            1
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.sinkers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatches `packet` to every registered sinker in insertion order,
    /// returning the first error encountered (if any) after every sinker
    /// has been tried.
    pub fn dispatch(&self, packet: Arc<Packet>) -> Result<(), StreamerError> {
        let sinkers: Vec<_> = self.sinkers.lock().unwrap().values().cloned().collect();
        let mut first_err = None;
        for sinker in sinkers {
            if let Err(e) = sinker.source_data(packet.clone()) {
                tracing::warn!(sinker = sinker.streamer_name(), error = %e, "sinker rejected packet");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Named lookup table for sinkers, generalized from the teacher's RTMP
/// mountpoint registry (`MOUNTPOINTS: Registry` keyed by stream path) to
/// any named streamer.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<dyn Sinker>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, streamer: Arc<dyn Sinker>) {
        let name = streamer.streamer_name().to_string();
        self.entries.lock().unwrap().insert(name, streamer);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.entries.lock().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Sinker>> {
        self.entries.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSinker {
        name: String,
        count: AtomicUsize,
    }

    impl Sinker for CountingSinker {
        fn streamer_name(&self) -> &str {
            &self.name
        }

        fn source_data(&self, _packet: Arc<Packet>) -> Result<(), StreamerError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn add_sinker_by_same_name_overwrites() {
        let fanout = SinkerFanout::new();
        fanout.add(Arc::new(CountingSinker { name: "a".into(), count: AtomicUsize::new(0) }));
        fanout.add(Arc::new(CountingSinker { name: "a".into(), count: AtomicUsize::new(0) }));
        assert_eq!(fanout.len(), 1);
    }

    #[test]
    fn remove_sinker_reports_count_removed() {
        let fanout = SinkerFanout::new();
        fanout.add(Arc::new(CountingSinker { name: "a".into(), count: AtomicUsize::new(0) }));
        assert_eq!(fanout.remove("a"), 1);
        assert_eq!(fanout.remove("a"), 0);
    }

    #[test]
    fn dispatch_reaches_every_sinker() {
        let fanout = SinkerFanout::new();
        let a = Arc::new(CountingSinker { name: "a".into(), count: AtomicUsize::new(0) });
        let b = Arc::new(CountingSinker { name: "b".into(), count: AtomicUsize::new(0) });
        fanout.add(a.clone());
        fanout.add(b.clone());

        fanout.dispatch(Arc::new(Packet::new(0))).unwrap();

        assert_eq!(a.count.load(Ordering::SeqCst), 1);
        assert_eq!(b.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_lookup_by_name() {
        let registry = Registry::new();
        registry.register(Arc::new(CountingSinker { name: "my_stream".into(), count: AtomicUsize::new(0) }));
        assert!(registry.get("my_stream").is_some());
        assert!(registry.unregister("my_stream"));
        assert!(registry.get("my_stream").is_none());
    }
}
