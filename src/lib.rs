// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! tuplekv: an embeddable key-value engine with tuple keys.
//!
//! Keys are tuples of strings, byte strings, integers, floats and booleans,
//! packed into an order-preserving byte encoding. Every write is an atomic
//! commit stamped with a monotonically increasing versionstamp; commits can
//! carry optimistic checks, numeric mutations and durable queue messages.
//! Rows may expire, range reads are resumable through opaque cursors, and
//! the same engine runs over memory, SQLite, RocksDB or a remote database.

pub mod key;
pub mod kv;
pub mod remote;
pub mod storage;
pub mod value;

pub use key::{pack_key, unpack_key, KeyError, KvBigInt, KvKey, KvKeyPart};
pub use kv::{
    decode_row, AtomicCheck, AtomicOperation, CommitOutcome, Consistency, EnqueueOptions, Kv,
    KvConfig, KvEntry, KvEntryMaybe, KvError, KvListIterator, KvListOptions, KvListSelector,
    KvMutation, KvResult, MutationKind, QueueHandler, SetOptions, Versionstamp,
};
pub use remote::{RemoteConfig, RemoteError, Transport};
pub use storage::{DurabilityMode, KvStore, StorageError};
pub use value::{EncodedValue, KvU64, KvValue, V8Codec, ValueCodec, ValueEncoding, ValueError};
