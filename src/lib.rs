//! Purpose: Request and transaction orchestration for Datastore-style document stores.
//! Exports: `core` (keys, values, queries, planning, errors) and `api` (client surface).
//! Role: Library crate; callers supply or reuse an `RpcClient` transport.
//! Invariants: `core` performs no I/O; all network traffic flows through `api::RpcClient`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
