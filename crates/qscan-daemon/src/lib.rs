//! Ambient status daemon (S4.9-adjacent ops surface): `main.rs` is
//! intentionally thin — it wires tracing, builds shared state, and starts
//! the HTTP server. Handlers live in `routes`, shared state in `state`.

pub mod routes;
pub mod state;
