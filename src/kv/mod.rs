//! C1: ordered key-value backend adapter.
//!
//! Every higher layer (schema, engine, WAL recovery) is built on top of
//! [`Kv`], an ordered byte-keyed store with atomic multi-key transactions,
//! prefix iteration, and a `sync`/`run_gc` contract. Durability is *not*
//! this layer's job — [`Kv`] is a purely in-memory structure; the WAL and
//! snapshot (`crate::wal`) are what make the store durable across restarts,
//! by replaying into a fresh `Kv` on open.
//!
//! There is deliberately no trait here for swapping in a third-party
//! backend. [`Kv`] is a concrete type.

mod memory;

pub use memory::{Kv, ReadTxn, WriteTxn};
