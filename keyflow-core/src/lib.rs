//! Keyflow Core
//!
//! This crate provides a keyed stream engine: it splits one event stream into
//! independently-lived per-key groups and keeps live, shared views over them.
//! It implements:
//!
//! - A synchronous push-stream layer (observables, subjects, broadcasts)
//! - A demultiplexer that routes events to per-key groups
//! - Folds that turn group lifecycles into live maps and live sets
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Push-stream primitives and serialized delivery
//! - `keyed`: Demultiplexer, aggregator, set projector and pipeline facade
//! - `config`: Lifecycle policies
//! - `error`: The error type carried by every stream
//!
//! # Example
//!
//! ```rust,ignore
//! use keyflow_core::keyed::Demultiplexer;
//! use keyflow_core::reactive::Subject;
//!
//! let commands = Subject::new();
//! let todos = Demultiplexer::new(|cmd: &Command| cmd.id)
//!     .with_transform(|cmds, _id| cmds.take_while(|c| !c.is_delete()))
//!     .split(&commands.observable())
//!     .collect();
//!
//! let _view = todos.subscribe_next(|map| println!("{} todos", map.len()));
//!
//! commands.next(Command::add(1, "buy milk"))?;
//! // prints "1 todos"
//! ```

pub mod config;
pub mod error;
pub mod keyed;
pub mod reactive;

pub use config::{CollectConfig, GroupErrorPolicy, MapCompletion, PipelineConfig, SourceCompletion, SplitConfig};
pub use error::StreamError;
pub use keyed::{Demultiplexer, GroupHandle, GroupId, GroupMap, KeyedPipeline, LiveMap, LiveSet};
pub use reactive::{Broadcast, Observable, Subject, Subscription};
