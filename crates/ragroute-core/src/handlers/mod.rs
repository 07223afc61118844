//! Retrieval handlers
//!
//! Handlers are the strategies the router chooses between. They are external
//! collaborators: this crate defines the capability trait and a registry,
//! plus dry-run placeholders for driving the router without real retrieval.

mod dry_run;
mod registry;
mod traits;

pub use dry_run::{DEFAULT_HANDLERS, DryRunHandler};
pub use registry::HandlerRegistry;
pub use traits::{Handler, HandlerInfo, HandlerOutput};
