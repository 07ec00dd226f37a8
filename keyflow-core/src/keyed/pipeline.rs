//! KeyedPipeline
//!
//! One pipeline instance: a command-submission source, a demultiplexer over
//! it, and the live group map folded from the demultiplexer's handles.
//!
//! ```rust,ignore
//! let pipeline = KeyedPipeline::new(
//!     Demultiplexer::new(|cmd: &Command| cmd.id).with_transform(todo_state),
//!     PipelineConfig::default(),
//! );
//! let open = pipeline.live_set(|todo, _| todo.map(|t| !t.done));
//! let _view = open.subscribe_next(|set| render(set.len()));
//!
//! pipeline.submit(Command::add(1, "buy milk"))?;
//! ```
//!
//! Nothing runs until something subscribes to one of the pipeline's outputs.
//! Commands submitted before that are not seen by anyone.

use std::fmt;

use super::collect::GroupMap;
use super::group::GroupKey;
use super::snapshot::{LiveMap, LiveSet};
use super::split::Demultiplexer;
use crate::config::PipelineConfig;
use crate::error::StreamError;
use crate::reactive::{Broadcast, Item, Observable, Subject};

pub struct KeyedPipeline<T, K, V> {
    source: Subject<T>,
    groups: Broadcast<GroupMap<K, V>>,
    config: PipelineConfig,
}

impl<T: Item, K: GroupKey, V: Item> KeyedPipeline<T, K, V> {
    /// Build a pipeline around `demux`. The demultiplexer's own split
    /// settings are replaced by `config.split`.
    pub fn new(demux: Demultiplexer<T, K, V>, config: PipelineConfig) -> Self {
        let source = Subject::new();
        let groups = demux
            .with_config(config.split)
            .split(&source.observable())
            .collect_with(config.collect);
        Self {
            source,
            groups,
            config,
        }
    }

    /// Submit one command.
    pub fn submit(&self, command: T) -> Result<(), StreamError> {
        self.source.next(command)
    }

    /// Fail the source. Every group and every output fails with `error`.
    pub fn fail(&self, error: StreamError) -> Result<(), StreamError> {
        tracing::debug!(%error, "pipeline source failed by its owner");
        self.source.error(error)
    }

    /// Complete the source.
    pub fn finish(&self) -> Result<(), StreamError> {
        self.source.complete()
    }

    /// Live map from each active key to its group.
    pub fn groups(&self) -> &Broadcast<GroupMap<K, V>> {
        &self.groups
    }

    /// Live set of active keys whose `predicate` holds.
    ///
    /// Built on the live group map, so it shares this pipeline's groups with
    /// every other view.
    pub fn live_set<F>(&self, predicate: F) -> Broadcast<LiveSet<K>>
    where
        F: Fn(Observable<V>, &K) -> Observable<bool> + Send + Sync + 'static,
    {
        self.groups.arrivals().collect_keys_with(predicate, self.config.collect)
    }

    /// Live map from each active key to its group's latest value.
    pub fn values(&self) -> Broadcast<LiveMap<K, V>> {
        self.groups.arrivals().collect_values_with(self.config.collect)
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_stopped()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl<T: Item, K, V> fmt::Debug for KeyedPipeline<T, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedPipeline")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
