//! arith-load: a load-generating client and a matching arithmetic server.
//!
//! The client ticks out random `{a, b}` requests into a bounded work queue.
//! A pool of workers, each owning one persistent connection, performs one
//! round trip per request and forwards the `{s, m}` answer to a result sink.
//! The server answers each request with the sum and product of its operands.
//!
//! Features:
//! - Bounded queue with backpressure (capacity = number of connections)
//! - At most one in-flight request per connection
//! - Ordered, bounded shutdown on interrupt
//! - Results appended to a file or logged
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod transport;

use tracing_subscriber::EnvFilter;

/// Install the global log subscriber. `RUST_LOG` overrides `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
