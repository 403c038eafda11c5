//! Callback dispatcher, envelopes and property bags.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Machine-readable status vocabulary shared by handlers and fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Done,
    Fail,
    InvalidRequest,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Done => "done",
            Status::Fail => "fail",
            Status::InvalidRequest => "invalid_request",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status tag plus arbitrary typed values attached to an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyBag {
    pub status: Status,
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl PropertyBag {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            values: Map::new(),
        }
    }

    pub fn done() -> Self {
        Self::new(Status::Done)
    }

    /// A `fail` bag carrying a diagnostic message under `msg`.
    pub fn fail(msg: impl Into<String>) -> Self {
        Self::new(Status::Fail).with("msg", msg.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(key, value);
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn message(&self) -> Option<&str> {
        self.get_str("msg")
    }

    pub fn is_done(&self) -> bool {
        self.status == Status::Done
    }

    /// Flattened JSON object: `{"status": ..., <values>}`.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::with_capacity(self.values.len() + 1);
        obj.insert("status".into(), Value::String(self.status.as_str().into()));
        for (k, v) in &self.values {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }
}

type Reaction<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// A single-shot completion channel.
///
/// The dispatcher owns one reaction. Obtaining an envelope consumes the
/// dispatcher, and sending the envelope consumes the envelope, so exactly one
/// payload can ever reach the reaction.
pub struct CallbackDispatcher<T = PropertyBag> {
    reaction: Reaction<T>,
}

impl<T: Send + 'static> CallbackDispatcher<T> {
    pub fn new<F>(reaction: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            reaction: Box::new(reaction),
        }
    }

    /// A dispatcher whose reaction ignores the payload.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Bind a fresh envelope to this dispatcher.
    pub fn obtain_envelope(self) -> Envelope<T> {
        Envelope {
            target: self,
            payload: None,
        }
    }

    /// Shorthand for `obtain_envelope().with_bag(payload).send_to_target()`.
    pub fn dispatch(self, payload: T) {
        (self.reaction)(payload);
    }

    /// Run `before` on the payload, then hand it to this dispatcher.
    ///
    /// Used to nest dispatchers: the returned dispatcher first performs its own
    /// step (e.g. metrics, logging) and then forwards to `self`.
    pub fn preceded_by<F>(self, before: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        CallbackDispatcher::new(move |payload: T| {
            before(&payload);
            self.dispatch(payload);
        })
    }
}

impl<T> fmt::Debug for CallbackDispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDispatcher").finish_non_exhaustive()
    }
}

/// An envelope bound to one dispatcher, waiting for its payload.
pub struct Envelope<T = PropertyBag> {
    target: CallbackDispatcher<T>,
    payload: Option<T>,
}

impl<T: Send + 'static> Envelope<T> {
    pub fn with_bag(mut self, payload: T) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Synchronously invoke the target's reaction on the current thread.
    pub fn send_to_target(self)
    where
        T: Default,
    {
        let payload = self.payload.unwrap_or_default();
        self.target.dispatch(payload);
    }
}

impl<T> fmt::Debug for Envelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_envelope_delivers_bag() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let dispatcher = CallbackDispatcher::new(move |bag: PropertyBag| {
            *s.lock().unwrap() = Some(bag);
        });

        dispatcher
            .obtain_envelope()
            .with_bag(PropertyBag::fail("disk full").with("path", "/tmp/x"))
            .send_to_target();

        let bag = seen.lock().unwrap().take().unwrap();
        assert_eq!(bag.status, Status::Fail);
        assert_eq!(bag.message(), Some("disk full"));
        assert_eq!(bag.get_str("path"), Some("/tmp/x"));
    }

    #[test]
    fn test_empty_envelope_uses_default_bag() {
        let status = Arc::new(Mutex::new(None));
        let s = status.clone();
        CallbackDispatcher::new(move |bag: PropertyBag| {
            *s.lock().unwrap() = Some(bag.status);
        })
        .obtain_envelope()
        .send_to_target();

        assert_eq!(*status.lock().unwrap(), Some(Status::Done));
    }

    #[test]
    fn test_reaction_runs_on_caller_thread() {
        let caller = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let r = ran_on.clone();
        CallbackDispatcher::new(move |_: PropertyBag| {
            *r.lock().unwrap() = Some(std::thread::current().id());
        })
        .dispatch(PropertyBag::done());
        assert_eq!(*ran_on.lock().unwrap(), Some(caller));
    }

    #[test]
    fn test_nested_dispatchers_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let outer = order.clone();
        let inner = order.clone();

        let complete = CallbackDispatcher::new(move |_: PropertyBag| {
            outer.lock().unwrap().push("complete");
        });
        let write_done = complete.preceded_by(move |bag| {
            inner.lock().unwrap().push(bag.status.as_str());
        });
        write_done.dispatch(PropertyBag::done());

        assert_eq!(*order.lock().unwrap(), vec!["done", "complete"]);
    }

    #[test]
    fn test_typed_payload() {
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        let dispatcher = CallbackDispatcher::new(move |n: usize| {
            t.fetch_add(n, Ordering::SeqCst);
        });
        dispatcher.dispatch(42);
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_bag_json_shape() {
        let bag = PropertyBag::new(Status::InvalidRequest).with("error_code", "404");
        let json = bag.to_json();
        assert_eq!(json["status"], "invalid_request");
        assert_eq!(json["error_code"], "404");

        let serialized = serde_json::to_value(&bag).unwrap();
        assert_eq!(serialized, json);
    }
}
