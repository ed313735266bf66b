//! Querybench
//!
//! Throughput comparison of Rust data-access libraries on one shared SQLite
//! fixture.
//!
//! # Components
//!
//! - **Store**: the shared connection pool, schema, and raw fixture writes
//! - **Fixtures**: deterministic datasets with closed-form selectivity
//! - **Backends**: sea-orm, sea-query and sqlx behind one capability trait
//! - **Scenarios**: named capabilities dispatched to every backend
//! - **Runner**: trial lifecycle, warm-up, timed iterations, equivalence checks
//! - **Cache**: backend-local cache resets between iterations
//! - **Report**: per-backend summaries as a table or JSON
//!
//! # Example
//!
//! ```no_run
//! use querybench::{store, PoolConfig, Runner, ScenarioRegistry, TrialConfig};
//!
//! let store = store::init_global(&PoolConfig::new())?;
//! let runner = Runner::new(&store, TrialConfig::new())?;
//! let registry = ScenarioRegistry::standard();
//! let reports = runner.run_all(registry.matching("query/"))?;
//! println!("{}", querybench::report::render_table(&reports));
//! store.close();
//! # Ok::<(), querybench::Error>(())
//! ```

pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod model;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod schema;
pub mod store;

pub use backends::{
    BackendAdapter, BackendKind, SeaOrmBackend, SeaQueryBackend, SqlxSessionBackend,
};
pub use cache::{CacheController, CachePolicy};
pub use config::{BenchConfig, PoolConfig, TrialConfig};
pub use error::{Error, Result};
pub use fixtures::{generate_users, Dataset, GeneratedData};
pub use model::{Amount, OrderRow, Outcome, UserRow};
pub use report::{ScenarioReport, Summary};
pub use runner::{Runner, Trial};
pub use scenario::{Capability, Scenario, ScenarioRegistry};
pub use store::FixtureStore;
