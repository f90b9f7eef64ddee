//! The columnar query engine.
//!
//! An [`Engine`] wraps one frozen store with everything a query needs:
//! the chainable [`Query`] surface, the optimizer, a fingerprint-keyed plan
//! cache, a compiled-predicate cache, an adaptive strategy tracker and a
//! bounded worker pool for the parallel paths. Engines are per store; there
//! is no process-wide state.
//!
//! ```
//! use frozen_store::FrozenStore;
//! use predicate::{Operator, Predicate};
//! use query_engine::Engine;
//! use std::sync::Arc;
//!
//! let store = FrozenStore::builder()
//!     .col_i32("age", vec![Some(30), Some(45), None])
//!     .freeze()
//!     .unwrap();
//! let engine = Engine::new(Arc::new(store));
//! let adults = engine
//!     .query()
//!     .filter(Predicate::cmp("age", Operator::GT, 40i64))
//!     .count()
//!     .unwrap();
//! assert_eq!(adults, 1);
//! ```
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod adaptive;
mod compile;
mod exec;
mod fingerprint;
mod optimizer;
mod physical;
mod plan;
mod plan_cache;
mod query;
mod results;

pub use adaptive::ExecutionSample;
pub use fingerprint::fingerprint;
pub use optimizer::optimize;
pub use physical::Strategy;
pub use plan::{LogicalPlan, SortKey};
pub use plan_cache::CacheStats;
pub use query::{GroupedQuery, Query};
pub use results::{GroupsOutput, QueryOutput, RowsOutput};

use std::sync::Arc;
use std::time::Instant;

use frozen_store::FrozenStore;
use observability_deps::tracing::debug;
use predicate::Predicate;
use snafu::Snafu;

/// The closed error set the engine surfaces.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("type mismatch: {}", message))]
    TypeMismatch { message: String },

    #[snafu(display("column \"{}\" does not exist", column))]
    UnknownColumn { column: String },

    #[snafu(display("the sequence contains no rows"))]
    EmptySequence,

    #[snafu(display("unsupported operation: {}", message))]
    Unsupported { message: String },

    #[snafu(display("invalid argument: {}", message))]
    InvalidArgument { message: String },

    #[snafu(display("parse error: {}", message))]
    Parse { message: String },

    #[snafu(display("arrow egress failed: {}", source))]
    ArrowEgress { source: frozen_store::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<predicate::Error> for Error {
    fn from(e: predicate::Error) -> Self {
        match e {
            predicate::Error::UnknownColumn { column } => Self::UnknownColumn { column },
            predicate::Error::TypeMismatch { .. } => Self::TypeMismatch {
                message: e.to_string(),
            },
            predicate::Error::SelectionLength { .. } => Self::InvalidArgument {
                message: e.to_string(),
            },
            predicate::Error::UnsupportedLike { .. } => Self::Unsupported {
                message: e.to_string(),
            },
        }
    }
}

impl From<aggregate::Error> for Error {
    fn from(e: aggregate::Error) -> Self {
        match e {
            aggregate::Error::UnknownColumn { column } => Self::UnknownColumn { column },
            aggregate::Error::TypeMismatch { .. } => Self::TypeMismatch {
                message: e.to_string(),
            },
            aggregate::Error::EmptySequence => Self::EmptySequence,
            aggregate::Error::Overflow => Self::InvalidArgument {
                message: e.to_string(),
            },
        }
    }
}

impl From<frozen_store::Error> for Error {
    fn from(e: frozen_store::Error) -> Self {
        match e {
            frozen_store::Error::UnknownColumn { column } => Self::UnknownColumn { column },
            frozen_store::Error::TypeMismatch { .. } => Self::TypeMismatch {
                message: e.to_string(),
            },
            other => Self::InvalidArgument {
                message: other.to_string(),
            },
        }
    }
}

/// Engine tuning knobs; the defaults match the documented behaviour.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub enable_plan_cache: bool,
    pub plan_cache_max_entries: usize,
    pub enable_compiled_predicates: bool,
    pub enable_parallel_execution: bool,
    pub parallel_row_threshold: usize,
    pub simd_row_threshold: usize,
    pub parallel_chunk_rows: usize,
    /// Worker pool bound; `0` leaves the pool's own default in place.
    pub max_workers: usize,
    pub adaptive_execution: bool,
    pub zone_map_chunk_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_plan_cache: true,
            plan_cache_max_entries: 256,
            enable_compiled_predicates: true,
            enable_parallel_execution: true,
            parallel_row_threshold: 50_000,
            simd_row_threshold: 1_000,
            parallel_chunk_rows: 65_536,
            max_workers: 0,
            adaptive_execution: true,
            zone_map_chunk_rows: frozen_store::DEFAULT_CHUNK_ROWS,
        }
    }
}

/// The per-store query engine.
#[derive(Debug)]
pub struct Engine {
    store: Arc<FrozenStore>,
    config: EngineConfig,
    pool: Option<rayon::ThreadPool>,
    plan_cache: plan_cache::PlanCache,
    tracker: adaptive::AdaptiveTracker,
    compiled: compile::CompiledCache,
}

impl Engine {
    pub fn new(store: Arc<FrozenStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<FrozenStore>, config: EngineConfig) -> Self {
        let pool = config.enable_parallel_execution.then(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_workers)
                .build()
                .expect("building the engine worker pool")
        });

        Self {
            plan_cache: plan_cache::PlanCache::new(config.plan_cache_max_entries),
            tracker: adaptive::AdaptiveTracker::new(),
            compiled: compile::CompiledCache::new(),
            store,
            config,
            pool,
        }
    }

    /// Freeze `builder` with this configuration's zone-map chunk size and
    /// wrap it in an engine.
    pub fn freeze(
        builder: frozen_store::StoreBuilder,
        config: EngineConfig,
    ) -> Result<Self> {
        let store = builder
            .zone_map_chunk_rows(config.zone_map_chunk_rows)
            .freeze()?;
        Ok(Self::with_config(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<FrozenStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a chainable query.
    pub fn query(&self) -> Query<'_> {
        Query::new(self)
    }

    /// Plan-cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.plan_cache.stats()
    }

    /// Compiled-predicate fallbacks observed so far.
    pub fn compiled_fallbacks(&self) -> u64 {
        self.compiled.fallback_count()
    }

    /// Whether the adaptive tracker changed its mind about `plan`'s
    /// fingerprint since last asked.
    pub fn has_improved(&self, plan: &LogicalPlan) -> bool {
        self.tracker.take_improved(&fingerprint::fingerprint(plan))
    }

    /// Run a logical plan through the full pipeline: fingerprint, plan
    /// cache, optimizer, physical planner, adaptive execution.
    pub fn run(&self, plan: LogicalPlan) -> Result<QueryOutput> {
        let fp = fingerprint::fingerprint(&plan);

        let optimized = if self.config.enable_plan_cache {
            self.plan_cache
                .get_or_insert_with(&fp, || optimizer::optimize(plan, &self.store))
        } else {
            Arc::new(optimizer::optimize(plan, &self.store))
        };

        let mut phys =
            physical::plan_physical(Arc::clone(&optimized), &self.store, &self.config);

        if self.config.adaptive_execution {
            if let Some(learned) = self.tracker.suggest(&fp) {
                debug!(%learned, "adaptive strategy override");
                phys.filter_strategy = learned;
                phys.aggregate_strategy = learned;
            }
        }

        let rows = optimized.estimated_rows(&self.store) as u64;
        let predicate_count = optimized.predicate_count();

        let start = Instant::now();
        let output = exec::execute(&phys, &self.exec_context())?;
        let elapsed = start.elapsed();

        if self.config.adaptive_execution {
            self.tracker.record(
                &fp,
                ExecutionSample {
                    strategy: phys.filter_strategy,
                    elapsed,
                    rows,
                    predicate_count,
                },
            );
        }

        Ok(output)
    }

    // Row indices of a row-shaped plan, for record materialization.
    pub(crate) fn run_indices(&self, plan: LogicalPlan) -> Result<Vec<u32>> {
        let optimized = Arc::new(optimizer::optimize(plan, &self.store));
        let phys = physical::plan_physical(Arc::clone(&optimized), &self.store, &self.config);
        exec::execute_indices(&phys, &self.exec_context())
    }

    // Streaming existence check with early exit.
    pub(crate) fn run_any(&self, filters: Vec<Predicate>) -> Result<bool> {
        let (predicates, mask) = self.optimized_filters(filters);
        exec::execute_any(&predicates, mask.as_deref(), &self.exec_context())
    }

    // Streaming first-match row index.
    pub(crate) fn run_first(&self, filters: Vec<Predicate>) -> Result<Option<usize>> {
        let (predicates, mask) = self.optimized_filters(filters);
        exec::first_matching_row(&predicates, mask.as_deref(), &self.exec_context())
    }

    // Optimize a bare filter chain down to (predicates, chunk mask).
    fn optimized_filters(
        &self,
        filters: Vec<Predicate>,
    ) -> (Vec<Predicate>, Option<Vec<bool>>) {
        let plan = if filters.is_empty() {
            LogicalPlan::scan()
        } else {
            LogicalPlan::Filter {
                input: Box::new(LogicalPlan::scan()),
                predicates: filters,
            }
        };
        match optimizer::optimize(plan, &self.store) {
            LogicalPlan::Scan { chunk_mask } => (vec![], chunk_mask),
            LogicalPlan::Filter { input, predicates } => match *input {
                LogicalPlan::Scan { chunk_mask } => (predicates, chunk_mask),
                _ => (predicates, None),
            },
            _ => unreachable!("optimizing a filter chain yields a filter chain"),
        }
    }

    fn exec_context(&self) -> exec::ExecContext<'_> {
        exec::ExecContext {
            store: &self.store,
            config: &self.config,
            pool: self.pool.as_ref(),
            compiled: &self.compiled,
        }
    }
}
