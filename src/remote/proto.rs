// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! KV Connect data path messages.

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotRead {
    #[prost(message, repeated, tag = "1")]
    pub ranges: Vec<ReadRange>,
}

/// Half-open range `[start, end)`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadRange {
    #[prost(bytes = "vec", tag = "1")]
    pub start: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub end: Vec<u8>,
    #[prost(int32, tag = "3")]
    pub limit: i32,
    #[prost(bool, tag = "4")]
    pub reverse: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SnapshotReadOutput {
    /// One output per requested range, in request order.
    #[prost(message, repeated, tag = "1")]
    pub ranges: Vec<ReadRangeOutput>,
    #[prost(bool, tag = "2")]
    pub read_disabled: bool,
    #[prost(bool, tag = "4")]
    pub read_is_strongly_consistent: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReadRangeOutput {
    #[prost(message, repeated, tag = "1")]
    pub values: Vec<KvEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KvEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(enumeration = "ValueEncoding", tag = "3")]
    pub encoding: i32,
    /// 10 raw bytes.
    #[prost(bytes = "vec", tag = "4")]
    pub versionstamp: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AtomicWrite {
    #[prost(message, repeated, tag = "1")]
    pub checks: Vec<Check>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<Mutation>,
    #[prost(message, repeated, tag = "3")]
    pub enqueues: Vec<Enqueue>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Check {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    /// All zeroes asserts absence.
    #[prost(bytes = "vec", tag = "2")]
    pub versionstamp: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Mutation {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<KvValue>,
    #[prost(enumeration = "MutationType", tag = "3")]
    pub mutation_type: i32,
    /// Absolute expiry in epoch millis; 0 for none.
    #[prost(int64, tag = "4")]
    pub expire_at_ms: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KvValue {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(enumeration = "ValueEncoding", tag = "2")]
    pub encoding: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Enqueue {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(int64, tag = "2")]
    pub deadline_ms: i64,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub keys_if_undelivered: Vec<Vec<u8>>,
    #[prost(uint32, repeated, tag = "4")]
    pub backoff_schedule: Vec<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AtomicWriteOutput {
    #[prost(enumeration = "AtomicWriteStatus", tag = "1")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub versionstamp: Vec<u8>,
    #[prost(string, tag = "3")]
    pub primary_if_write_disabled: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ValueEncoding {
    Unspecified = 0,
    V8 = 1,
    Le64 = 2,
    Bytes = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MutationType {
    Unspecified = 0,
    Set = 1,
    Clear = 2,
    Sum = 3,
    Max = 4,
    Min = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum AtomicWriteStatus {
    Unspecified = 0,
    Success = 1,
    CheckFailure = 2,
    WriteDisabled = 5,
}
