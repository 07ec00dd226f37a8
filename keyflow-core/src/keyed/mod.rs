//! Keyed Engine
//!
//! Splits one event stream into per-key groups and folds the groups'
//! lifecycles into live views.
//!
//! ```text
//! events ─► Demultiplexer ─► GroupHandles ─► collect ─► Broadcast<GroupMap>
//!                                   │                         │
//!                                   │                   arrivals / filter_split
//!                                   ▼                         ▼
//!                             collect_keys ───────────► Broadcast<LiveSet>
//! ```
//!
//! # Invariants
//!
//! - At most one live group per key. A key whose group ended starts a new
//!   group, with a new [`GroupId`], on its next event.
//! - A key is in a [`GroupMap`] exactly while its most recent group has not
//!   ended.
//! - Every view emits its empty seed when subscribed, then one snapshot per
//!   change, in a total order per pipeline instance.
//! - A group's start snapshot is emitted before anything its end causes.
//!
//! Cancellation flows the other way: dropping the last subscriber of a view
//! cancels its fold, the demultiplexer under it, every live group and the
//! source subscription.

mod collect;
mod fold;
mod group;
mod keys;
mod pipeline;
mod snapshot;
mod split;
mod values;

pub use collect::GroupMap;
pub use group::{GroupHandle, GroupId, GroupKey};
pub use pipeline::KeyedPipeline;
pub use snapshot::{LiveMap, LiveSet};
pub use split::Demultiplexer;
