//! Bolt session engine
//!
//! Connection state machine and transaction lifecycle controller for a graph
//! database server. A transport decodes request messages and hands them to a
//! [`Session`] together with a [`ResponseSink`]; the session validates each
//! request against its state, drives its transaction context and query engine,
//! and writes response events back.
//!
//! # Modules
//!
//! - [`session`]: the state machine and the out-of-band interrupt handle
//! - [`transaction`] and [`cursor`]: transaction contexts with multiplexed results
//! - [`bookmark`]: causal-consistency tokens and the wait gate
//! - [`registry`]: owner map of live sessions for multi-threaded servers
//! - [`transport`]: length-prefixed MessagePack framing over Unix sockets
//! - [`engine`]: the query engine traits and an in-memory reference engine
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use boltsm::auth::NoAuth;
//! use boltsm::config::SessionConfig;
//! use boltsm::engine::MemoryEngine;
//! use boltsm::messages::Request;
//! use boltsm::response::ResponseRecorder;
//! use boltsm::session::{Session, State};
//!
//! let engine = Arc::new(MemoryEngine::new("neo4j").unwrap());
//! let mut session = Session::new(1, engine, Arc::new(NoAuth), SessionConfig::default());
//! let mut sink = ResponseRecorder::new();
//!
//! session.process(Request::hello("docs/1.0"), &mut sink).unwrap();
//! session.process(Request::run("UNWIND range(1, 3) AS x RETURN x"), &mut sink).unwrap();
//! session.process(Request::pull_all(), &mut sink).unwrap();
//!
//! assert_eq!(sink.records().len(), 3);
//! assert_eq!(session.state(), State::Ready);
//! ```

pub mod auth;
pub mod bookmark;
pub mod cancel;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod response;
pub mod session;
pub mod transaction;
pub mod transport;

pub use error::{BoltError, ConnectionFatality, EngineError, Result, Status, StatusKind};
pub use messages::Request;
pub use response::{Response, ResponseRecorder, ResponseSink};
pub use session::{InterruptHandle, Session, SessionId, State};
