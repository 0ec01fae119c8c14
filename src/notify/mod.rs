//! Upstream notification sink
//!
//! Device lifecycle and property events are reported to the home-automation
//! controller as `(device, event, args)` triples. Delivery is fire-and-forget:
//! failures are logged and never reach the caller. Events are delivered in
//! the order they were raised.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::devices::PropertyValue;

/// Event forwarded to the upstream controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    Error(String),
    Connected,
    Disconnected,
    PropChanged {
        property: String,
        value: PropertyValue,
    },
    Message(String),
}

impl NotifyEvent {
    /// Event name on the upstream contract
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Error(_) => "OnError",
            Self::Connected => "OnConnected",
            Self::Disconnected => "OnDisconnected",
            Self::PropChanged { .. } => "OnPropChanged",
            Self::Message(_) => "OnMessage",
        }
    }

    /// Positional arguments on the upstream contract
    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::Error(message) | Self::Message(message) => vec![json!(message)],
            Self::Connected | Self::Disconnected => Vec::new(),
            Self::PropChanged { property, value } => vec![json!(property), json!(value)],
        }
    }
}

/// Receives upstream notifications
pub trait Notifier: Send + Sync {
    /// Deliver one event; must not block
    fn notify(&self, device: &str, event: NotifyEvent);
}

/// Shared notifier handle
pub type SharedNotifier = Arc<dyn Notifier>;

/// Notifier that only logs, used when no upstream is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, device: &str, event: NotifyEvent) {
        tracing::info!(device, event = event.name(), args = ?event.args(), "notify");
    }
}

/// JSON body posted upstream
#[derive(Debug, Serialize)]
pub struct NotificationBody<'a> {
    pub device: &'a str,
    pub event: &'static str,
    pub args: Vec<Value>,
}

/// Encoded notification waiting for delivery
#[derive(Debug)]
struct Outgoing {
    device: String,
    event: &'static str,
    body: Value,
}

/// Notifier posting each event as JSON to an HTTP endpoint
///
/// A single delivery task drains a queue, so the controller sees events in
/// the order they were raised. The task ends once every clone is dropped.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    queue: mpsc::UnboundedSender<Outgoing>,
    url: String,
}

impl HttpNotifier {
    /// Create a notifier posting to `url` and start its delivery task
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let (queue, outgoing) = mpsc::unbounded_channel();
        tokio::spawn(deliver(reqwest::Client::new(), url.clone(), outgoing));
        Self { queue, url }
    }

    /// Target URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for HttpNotifier {
    fn notify(&self, device: &str, event: NotifyEvent) {
        let body = match serde_json::to_value(NotificationBody {
            device,
            event: event.name(),
            args: event.args(),
        }) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, device, "failed to encode notification");
                return;
            }
        };
        let outgoing = Outgoing {
            device: device.to_string(),
            event: event.name(),
            body,
        };
        if self.queue.send(outgoing).is_err() {
            tracing::warn!(device, event = event.name(), "notification queue closed");
        }
    }
}

/// Post queued notifications one at a time
async fn deliver(client: reqwest::Client, url: String, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(Outgoing {
        device,
        event,
        body,
    }) = outgoing.recv().await
    {
        let sent = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        match sent {
            Ok(_) => tracing::trace!(device = %device, event, "notification delivered"),
            Err(e) => tracing::warn!(
                device = %device,
                event,
                error = %e,
                "failed to deliver notification"
            ),
        }
    }
    tracing::debug!(url = %url, "notification delivery stopped");
}

/// Build the notifier for an optional upstream URL
#[must_use]
pub fn from_url(url: Option<&str>) -> SharedNotifier {
    match url {
        Some(url) => {
            tracing::info!(url, "forwarding device events upstream");
            Arc::new(HttpNotifier::new(url))
        }
        None => {
            tracing::info!("no upstream configured, device events are only logged");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_upstream_contract() {
        assert_eq!(NotifyEvent::Connected.name(), "OnConnected");
        assert_eq!(NotifyEvent::Disconnected.name(), "OnDisconnected");
        assert_eq!(NotifyEvent::Error("x".into()).name(), "OnError");
        assert_eq!(NotifyEvent::Message("x".into()).name(), "OnMessage");
    }

    #[test]
    fn prop_changed_args_are_name_then_value() {
        let event = NotifyEvent::PropChanged {
            property: "state".to_string(),
            value: PropertyValue::from("open"),
        };
        assert_eq!(event.args(), vec![json!("state"), json!("open")]);
    }

    #[test]
    fn body_serializes_flat() {
        let body = NotificationBody {
            device: "blind1",
            event: "OnMessage",
            args: vec![json!("hello")],
        };
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["device"], "blind1");
        assert_eq!(value["args"][0], "hello");
    }

    #[tokio::test]
    async fn http_notifier_delivers_in_raised_order() {
        use std::sync::Mutex;

        use axum::{Json, Router, extract::State, routing::post};

        let received = Arc::new(Mutex::new(Vec::<Value>::new()));
        let app = Router::new()
            .route(
                "/events",
                post(|State(received): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    received.lock().unwrap().push(body);
                }),
            )
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let notifier = HttpNotifier::new(format!("http://{addr}/events"));
        let sent: Vec<String> = (0..100).map(|i| format!("{i:03}")).collect();
        for text in &sent {
            notifier.notify("blind1", NotifyEvent::Message(text.clone()));
        }

        for _ in 0..500 {
            if received.lock().unwrap().len() == sent.len() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let texts: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["args"][0].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, sent);
    }
}
