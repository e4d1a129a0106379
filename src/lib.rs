//! Tasklane: a persistent task execution engine.
//!
//! Tasklane runs units of work ("tasks") through a fixed lifecycle. Work is
//! created by a host application, dispatched by a scheduler to type-specific
//! handlers, and finished by a completion callback, an operator, or a signed
//! external continuation.
//!
//! # Architecture
//!
//! Tasklane follows hexagonal architecture principles:
//!
//! - **Domain**: task record, status state machine and query values
//! - **Ports**: the task store, handler and completion callback contracts
//! - **Adapters**: in-memory and `PostgreSQL` stores
//! - **Services**: registry, scheduler, continuation resolver and lifecycle
//!   operations
//!
//! # Modules
//!
//! - [`config`]: engine configuration
//! - [`task`]: the task engine itself

pub mod config;
pub mod task;
