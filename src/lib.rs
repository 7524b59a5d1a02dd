//! `lattice_node`: the consensus and ledger core of a block-lattice
//! cryptocurrency node (`spec.md` §1-§2).
//!
//! This crate implements the four tightly-coupled components the
//! specification centers on — [`ledger`] (block validation), [`active_transactions`]
//! (election scheduling), [`active_transactions::election`] (per-root quorum),
//! and [`confirmation_height`] (crash-safe cementation) — plus the data model
//! ([`types`], [`blocks`]), the storage collaborator contract ([`store`]),
//! and the process wiring that assembles them into a runnable node ([`node`]).
//!
//! Transport, bootstrap, wallet/PoW generation, RPC/WebSocket, and telemetry
//! are external collaborators; only their interfaces are modeled, in
//! [`collaborators`].

pub mod active_transactions;
pub mod block_processor;
pub mod blocks;
pub mod collaborators;
pub mod config;
pub mod confirmation_height;
pub mod crypto;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod observers;
pub mod store;
pub mod types;
pub mod vote;
