//! Query/transact client for the skiff fact store.
//!
//! Reads go through a templated query builder, a per-client response cache
//! and a retry layer before the EDN response is decoded and normalized into
//! camelCased JSON objects. Writes encode entities as EDN and deliver them
//! over a message-bus topic or HTTP.
//!
//! # Example
//!
//! ```no_run
//! use skiff_datalog::{DatalogClient, Entity, Params, QueryOptions, Result, TransactOptions};
//!
//! # async fn example() -> Result<()> {
//! let client = DatalogClient::builder()
//!     .workspace_id("T29E48P34")
//!     .api_key("key")
//!     .build()?;
//!
//! let rows = client
//!     .query(
//!         "[:find (pull ?r [*]) :in $ $before-db % :where [?r :git.repo/name ?name]]",
//!         &Params::new().with("name", "skiff"),
//!         QueryOptions::new(),
//!     )
//!     .await?;
//! for row in rows.rows() {
//!     println!("{}", row["repo"]["name"]);
//! }
//!
//! let repo = Entity::new("git/repo").attr("name", "skiff");
//! client.transact([repo], TransactOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod edn;
pub mod entity;
pub mod error;
pub mod map;
pub mod query;
pub mod retry;
pub mod transact;
pub mod transport;

pub use cache::{ResponseCache, sha256_hex};
pub use client::{
    DatalogClient, DatalogClientBuilder, NamedQuery, PRODUCTION_ENDPOINT, QueryDefaults,
    QueryResult, STAGING_ENDPOINT,
};
pub use edn::{Keyword, Record, Value};
pub use entity::{Entity, add_values, entity_ref, entity_refs, set_values};
pub use error::{DatalogError, Result};
pub use map::normalize;
pub use query::{Params, QueryMode, QueryOptions, prepare_args, prepare_query_body};
pub use retry::{RetryPolicy, retry};
pub use transact::{TransactOptions, TransactStats, TransactTarget};
pub use transport::{HttpClient, MessagePublisher, TopicPublisher, TopicRegistry, TopicSettings};
