//! A small microblogging node with read-only federation.
//!
//! Each node keeps its chirps in memory and speaks plain HTTP/1.1 over TCP
//! without a web framework. Reading `GET /chirps` returns the local chirps
//! followed by those of every configured peer; a peer that cannot answer is
//! replaced by a single error entry so one bad peer never breaks the feed.
//!
//! - [`server`] accepts connections, caps how many are served at once, and
//!   runs one task per connection.
//! - [`http`] frames requests and responses on the socket.
//! - [`router`] maps method and path to a [`router::Route`].
//! - [`handlers`] implements the chirp API on top of [`store`].
//! - [`federation`] fans `GET /chirps` out to peers and merges the answers.
//! - [`static_files`] serves the document root for every other `GET`.
//! - [`config`] and [`cli`] describe how a node is set up.
//!
//! Integration tests drive real servers on ephemeral ports through this crate.

pub mod chirp;
pub mod cli;
pub mod config;
pub mod error;
pub mod federation;
pub mod handlers;
pub mod http;
pub mod router;
pub mod server;
pub mod static_files;
pub mod store;
