//! Cluster routing.
//!
//! A thin layer above single-node command execution: when the server is
//! started with peer addresses configured, every parsed command passes
//! through [`router::ClusterRouter`] instead of going straight to
//! `commands::CommandHandler`. With no peers configured this module is
//! never constructed and single-node behavior is unchanged.

pub mod pool;
pub mod ring;
pub mod router;

pub use router::ClusterRouter;
