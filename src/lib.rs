//! Purpose: Adapter exposing a dynamically loaded tdjson library to a Rust host.
//! Exports: `api` (load facade, legacy clients, multiplexer, log registry), `core`, `notice`.
//! Role: Library backing the `tdjson` CLI and embedding hosts.
//! Invariants: Payloads are opaque JSON strings; this crate never interprets them.
//! Invariants: Native calls are confined to `core::symbols`.
pub mod api;
pub mod core;
pub mod notice;
