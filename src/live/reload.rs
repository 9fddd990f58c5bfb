use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tungstenite::WebSocket;

/// Connections kept open at most, older ones are closed first.
const MAX_CLIENTS: usize = 10;

/// A message pushed to every connected browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Swap the stylesheet served under `path` without reloading the page.
    Css { path: String },
    /// Reload the whole page.
    Reload,
}

/// Delivery of live-reload messages to connected clients.
pub trait Transport: Send + Sync {
    fn broadcast(&self, message: &Message);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn broadcast(&self, message: &Message) {
        (**self).broadcast(message)
    }
}

/// The live-reload channel. A single instance lives as long as the dev
/// server and is shared with every builder that has something to push.
pub struct LiveReload {
    transport: Box<dyn Transport>,
    reloads: AtomicUsize,
    css_updates: AtomicUsize,
}

impl LiveReload {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            reloads: AtomicUsize::new(0),
            css_updates: AtomicUsize::new(0),
        }
    }

    /// Instructs every client to reload the page.
    pub fn reload_all(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("broadcasting full reload");
        self.transport.broadcast(&Message::Reload);
    }

    /// Instructs every client to refetch the stylesheet served under `path`.
    pub fn update_css(&self, path: impl Into<String>) {
        let path = path.into();
        self.css_updates.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%path, "broadcasting stylesheet update");
        self.transport.broadcast(&Message::Css { path });
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn css_update_count(&self) -> usize {
        self.css_updates.load(Ordering::Relaxed)
    }
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Websocket transport. One thread accepts incoming clients, another one
/// fans serialized messages out to them.
pub struct WebSocketHub {
    port: u16,
    sender: Mutex<Sender<String>>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl WebSocketHub {
    /// Listens on the preferred port, or on any free one when it's taken.
    pub fn bind(host: &str, port: u16) -> std::io::Result<Self> {
        let listener = match TcpListener::bind((host, port)) {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind((host, 0))?,
        };

        let port = listener.local_addr()?.port();
        let clients = Arc::new(Mutex::new(vec![]));

        let incoming = new_thread_ws_incoming(listener, clients.clone());
        let (sender, outgoing) = new_thread_ws_broadcast(clients);

        Ok(Self {
            port,
            sender: Mutex::new(sender),
            _threads: (incoming, outgoing),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Transport for WebSocketHub {
    fn broadcast(&self, message: &Message) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("couldn't serialize live-reload message: {e}");
                return;
            }
        };

        if let Ok(sender) = self.sender.lock() {
            sender.send(payload).ok();
        }
    }
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("rejected live-reload client: {e}");
                    continue;
                }
            };

            if let Ok(mut clients) = clients.lock() {
                clients.push(socket);
            }
        }
    })
}

fn new_thread_ws_broadcast(clients: Clients) -> (Sender<String>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel::<String>();

    let thread = std::thread::spawn(move || {
        while let Ok(payload) = rx.recv() {
            let Ok(mut clients) = clients.lock() else {
                break;
            };

            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(tungstenite::Message::text(payload.clone())) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        tracing::error!("live-reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Browser side of the live-reload channel.
const CLIENT: &str = r#"
(() => {
  const socket = new WebSocket(`ws://${location.hostname}:__PORT__`);
  socket.addEventListener("message", (event) => {
    const message = JSON.parse(event.data);
    if (message.type !== "css") {
      window.location.reload();
      return;
    }
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {
      const url = new URL(link.href);
      if (url.pathname === message.path) {
        url.searchParams.set("v", Date.now().toString());
        link.href = url.toString();
      }
    }
  });
})();
"#;

/// Returns the `<script>` element connecting a page to the websocket on
/// `port`.
pub fn client_snippet(port: u16) -> String {
    format!(
        "<script>{}</script>",
        CLIENT.replace("__PORT__", &port.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use tungstenite::stream::MaybeTlsStream;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Message>>);

    impl Transport for Recorder {
        fn broadcast(&self, message: &Message) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn test_message_format() {
        let css = Message::Css {
            path: "/css/style.min.css".into(),
        };

        assert_eq!(
            serde_json::to_string(&css).unwrap(),
            r#"{"type":"css","path":"/css/style.min.css"}"#
        );
        assert_eq!(
            serde_json::to_string(&Message::Reload).unwrap(),
            r#"{"type":"reload"}"#
        );
    }

    #[test]
    fn test_counts_and_delivery() {
        let recorder = Arc::new(Recorder::default());
        let reload = LiveReload::new(recorder.clone());

        reload.update_css("/css/style.min.css");
        reload.reload_all();
        reload.reload_all();

        assert_eq!(reload.css_update_count(), 1);
        assert_eq!(reload.reload_count(), 2);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                Message::Css {
                    path: "/css/style.min.css".into()
                },
                Message::Reload,
                Message::Reload,
            ]
        );
    }

    #[test]
    fn test_client_snippet() {
        let snippet = client_snippet(4321);

        assert!(snippet.starts_with("<script>"));
        assert!(snippet.contains(":4321`"));
        assert!(!snippet.contains("__PORT__"));
    }

    #[test]
    fn test_hub_delivers_to_clients() {
        let hub = WebSocketHub::bind("127.0.0.1", 0).unwrap();
        let (mut socket, _) =
            tungstenite::connect(format!("ws://127.0.0.1:{}", hub.port())).unwrap();

        // the accept thread registers the client asynchronously
        let mut received = None;
        for _ in 0..50 {
            hub.broadcast(&Message::Reload);
            if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
                stream
                    .set_read_timeout(Some(std::time::Duration::from_millis(100)))
                    .unwrap();
            }
            if let Ok(message) = socket.read() {
                received = Some(message);
                break;
            }
        }

        let text = received.unwrap().into_text().unwrap();
        assert_eq!(text.as_str(), r#"{"type":"reload"}"#);
    }
}
