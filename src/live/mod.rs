//! The development server and its live-reload channel.
//!
//! 1. **HTTP server**: `axum` serving the output tree with permissive CORS
//!    headers, on a dedicated thread with its own runtime. HTML responses get
//!    the client script appended right before `</body>`.
//! 2. **Websocket hub**: `tungstenite` connections with every open tab,
//!    accepted and written to from two more threads.
//! 3. **Client script**: listens for two kinds of messages. A stylesheet
//!    update swaps the matching `<link>` in place, anything else reloads the
//!    page.
//!
//! Builders never see the websocket, they hold a [`LiveReload`] which can be
//! constructed over any [`Transport`].

mod http;
mod reload;

pub use http::{DevServer, Session};
pub use reload::{LiveReload, Message, Transport, WebSocketHub, client_snippet};
