use crate::stage::{Ack, Capability, Stage};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Producer that emits the items of an iterator, then ends the stream
pub struct SequenceSource<T> {
    name: String,
    items: Box<dyn Iterator<Item = T> + Send>,
}

impl<T: Send + 'static> SequenceSource<T> {
    pub fn new<I>(name: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            name: name.into(),
            items: Box::new(items.into_iter()),
        }
    }
}

impl<T: Send + 'static> Stage for SequenceSource<T> {
    type In = ();
    type Out = T;

    const CAPABILITY: Capability = Capability::Producer;

    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> Option<T> {
        self.items.next()
    }
}

/// Consumer that keeps a copy of every payload it accepts
pub struct CollectSink<T> {
    name: String,
    collected: Arc<Mutex<Vec<T>>>,
    delay: Option<Duration>,
}

impl<T: Clone + Send + 'static> CollectSink<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collected: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleep before accepting each payload, simulating a slow consumer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared view of the collected payloads
    pub fn collected(&self) -> Arc<Mutex<Vec<T>>> {
        Arc::clone(&self.collected)
    }
}

impl<T: Clone + Send + 'static> Stage for CollectSink<T> {
    type In = T;
    type Out = ();

    const CAPABILITY: Capability = Capability::Consumer;

    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, input: &T) -> Ack {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.collected.lock().push(input.clone());
        Ack::Ok
    }
}
