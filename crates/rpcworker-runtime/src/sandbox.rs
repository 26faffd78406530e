//! Seam between the dispatcher and application code.

use std::collections::HashMap;

use crate::error::SandboxError;
use crate::session::Request;
use crate::stream::Stream;

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Locates the handler for an event and starts it.
///
/// `invoke` runs on the worker loop. It must return promptly; long-running
/// work should be spawned onto the runtime together with the `Request` and
/// `Stream` it was given.
pub trait Sandbox {
    fn invoke(&mut self, event: &str, request: Request, stream: Stream)
        -> Result<(), SandboxError>;
}

/// Application logic bound to one event name.
pub trait Handler {
    fn call(&mut self, request: Request, stream: Stream) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: FnMut(Request, Stream) -> Result<(), HandlerError>,
{
    fn call(&mut self, request: Request, stream: Stream) -> Result<(), HandlerError> {
        self(request, stream)
    }
}

/// Event-name → handler map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `event`, replacing any previous binding.
    pub fn on(&mut self, event: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.insert(event.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }
}

impl Sandbox for HandlerRegistry {
    fn invoke(
        &mut self,
        event: &str,
        request: Request,
        stream: Stream,
    ) -> Result<(), SandboxError> {
        let handler = self
            .handlers
            .get_mut(event)
            .ok_or_else(|| SandboxError::UnknownEvent(event.to_string()))?;
        handler
            .call(request, stream)
            .map_err(|source| SandboxError::Handler {
                event: event.to_string(),
                source,
            })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rpcworker_proto::Message;

    use super::*;
    use crate::session::request_pair;
    use crate::stream::Outbox;

    #[test]
    fn registered_handler_receives_session_pair() {
        let (outbox, mut rx) = Outbox::channel();
        let mut registry = HandlerRegistry::new();
        registry.on("ping", |_request: Request, mut stream: Stream| -> Result<(), HandlerError> {
            stream.write("pong")?;
            stream.close()?;
            Ok(())
        });

        let (_sink, request) = request_pair(3);
        registry
            .invoke("ping", request, Stream::new(3, outbox))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), Message::chunk(3, "pong"));
        assert_eq!(rx.try_recv().unwrap(), Message::choke(3));
    }

    #[test]
    fn unknown_event_is_reported() {
        let (outbox, _rx) = Outbox::channel();
        let mut registry = HandlerRegistry::new();
        let (_sink, request) = request_pair(1);

        let err = registry
            .invoke("missing", request, Stream::new(1, outbox))
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnknownEvent(event) if event == "missing"));
    }

    #[test]
    fn handler_failure_carries_event_name() {
        let (outbox, _rx) = Outbox::channel();
        let mut registry = HandlerRegistry::new();
        registry.on("fail", |_: Request, _: Stream| -> Result<(), HandlerError> {
            Err("no database".into())
        });
        let (_sink, request) = request_pair(1);

        let err = registry
            .invoke("fail", request, Stream::new(1, outbox))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "handler for event 'fail' failed: no database"
        );
    }

    #[test]
    fn events_are_listed_sorted() {
        let mut registry = HandlerRegistry::new();
        let noop = |_: Request, _: Stream| -> Result<(), HandlerError> { Ok(()) };
        registry.on("b", noop).on("a", noop);
        assert_eq!(registry.events(), vec!["a", "b"]);
        assert!(registry.contains("a"));
    }
}
