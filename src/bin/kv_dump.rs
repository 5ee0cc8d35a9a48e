// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Prints every entry of a local database.
//!
//! Usage:
//!   ./kv_dump <path>                 # SQLite file, human-readable output
//!   ./kv_dump <path> --json          # one JSON object per line
//!   ./kv_dump <path> --rocks         # RocksDB directory

use std::process::ExitCode;

use anyhow::Context;
use tuplekv::kv::decode_row;
use tuplekv::storage::{KvStore, RocksStore, Row, ScanRange, SqliteStore};
use tuplekv::{KvValue, V8Codec};

const PAGE: usize = 500;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json_mode = args.iter().any(|a| a == "--json");
    let rocks = args.iter().any(|a| a == "--rocks");
    let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("usage: kv_dump <path> [--json] [--rocks]");
        return ExitCode::from(2);
    };

    let result = if rocks {
        RocksStore::open(path)
            .with_context(|| format!("opening rocksdb at {path}"))
            .and_then(|store| dump(&store, json_mode))
    } else {
        SqliteStore::open(path)
            .with_context(|| format!("opening sqlite at {path}"))
            .and_then(|store| dump(&store, json_mode))
    };
    match result {
        Ok(count) => {
            if !json_mode {
                println!("{count} entries");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("kv_dump: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dump<S: KvStore>(store: &S, json_mode: bool) -> anyhow::Result<usize> {
    let mut start = Vec::new();
    let mut count = 0;
    loop {
        let rows = store.scan(&ScanRange {
            start: start.clone(),
            end: vec![0xff],
            limit: PAGE,
            reverse: false,
        })?;
        for row in &rows {
            print_row(row, json_mode)?;
            count += 1;
        }
        match rows.last() {
            Some(last) if rows.len() == PAGE => {
                start = last.key.clone();
                start.push(0x00);
            }
            _ => break,
        }
    }
    store.close()?;
    Ok(count)
}

fn value_json(value: &KvValue) -> serde_json::Value {
    match value {
        KvValue::Bytes(bytes) => serde_json::json!({ "bytes": hex::encode(bytes) }),
        KvValue::U64(v) => serde_json::json!({ "u64": v.value().to_string() }),
        KvValue::Structured(v) => v.clone(),
    }
}

fn print_row(row: &Row, json_mode: bool) -> anyhow::Result<()> {
    let entry = decode_row(row, &V8Codec)
        .with_context(|| format!("decoding row {}", hex::encode(&row.key)))?;
    if json_mode {
        let line = serde_json::json!({
            "key": entry.key.to_string(),
            "value": value_json(&entry.value),
            "versionstamp": entry.versionstamp.as_str(),
            "expires_at": row.expires_at,
        });
        println!("{line}");
    } else {
        let expiry = row
            .expires_at
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|at| format!("  (expires {})", at.to_rfc3339()))
            .unwrap_or_default();
        println!(
            "{}  {}  {}{}",
            entry.versionstamp,
            entry.key,
            value_json(&entry.value),
            expiry
        );
    }
    Ok(())
}
