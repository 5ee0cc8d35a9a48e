// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Behaviour every store must share, run against each implementation.

use crate::kv::Versionstamp;
use crate::value::ValueEncoding;

use super::{KvStore, NewQueueItem, Row, ScanRange, StorageError};

pub(crate) fn row(key: &[u8], value: &[u8], version: u64, expires_at: Option<i64>) -> Row {
    Row {
        key: key.to_vec(),
        value: value.to_vec(),
        encoding: ValueEncoding::Bytes,
        versionstamp: Versionstamp::from_version(version).unwrap(),
        expires_at,
    }
}

fn put<S: KvStore>(store: &S, rows: Vec<Row>) {
    store
        .run_atomic(|txn| {
            for row in rows {
                txn.put_row(row)?;
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();
}

fn keys(rows: &[Row]) -> Vec<Vec<u8>> {
    rows.iter().map(|r| r.key.clone()).collect()
}

pub(crate) fn exercise_rows<S: KvStore>(store: &S) {
    assert!(store.get_row(b"a").unwrap().is_none());
    put(store, vec![row(b"a", b"1", 1, None), row(b"b", b"2", 1, Some(99))]);

    let a = store.get_row(b"a").unwrap().unwrap();
    assert_eq!(a.value, b"1");
    assert_eq!(a.versionstamp, Versionstamp::from_version(1).unwrap());
    assert_eq!(a.expires_at, None);
    assert_eq!(store.get_row(b"b").unwrap().unwrap().expires_at, Some(99));

    put(store, vec![row(b"a", b"3", 2, None)]);
    assert_eq!(store.get_row(b"a").unwrap().unwrap().value, b"3");

    let many = store
        .get_rows(&[b"a".to_vec(), b"missing".to_vec(), b"b".to_vec()])
        .unwrap();
    assert_eq!(many.len(), 2);
    assert!(many.contains_key(b"a".as_slice()));
    assert!(!many.contains_key(b"missing".as_slice()));

    let deleted = store
        .run_atomic(|txn| {
            let first = txn.delete_row(b"a")?;
            let second = txn.delete_row(b"a")?;
            Ok::<_, StorageError>((first, second))
        })
        .unwrap();
    assert_eq!(deleted, (true, false));
    assert!(store.get_row(b"a").unwrap().is_none());

    store
        .run_atomic(|txn| {
            assert_eq!(txn.version()?, 0);
            txn.set_version(7)?;
            Ok::<_, StorageError>(())
        })
        .unwrap();
    let version = store.run_atomic(|txn| txn.version()).unwrap();
    assert_eq!(version, 7);
}

pub(crate) fn exercise_scan<S: KvStore>(store: &S) {
    put(
        store,
        vec![
            row(b"a", b"", 1, None),
            row(b"b", b"", 1, None),
            row(b"c", b"", 1, None),
            row(b"d", b"", 1, None),
        ],
    );

    let forward = store
        .scan(&ScanRange {
            start: b"b".to_vec(),
            end: b"d".to_vec(),
            limit: 10,
            reverse: false,
        })
        .unwrap();
    assert_eq!(keys(&forward), vec![b"b".to_vec(), b"c".to_vec()]);

    let reverse = store
        .scan(&ScanRange {
            start: b"a".to_vec(),
            end: b"z".to_vec(),
            limit: 3,
            reverse: true,
        })
        .unwrap();
    assert_eq!(keys(&reverse), vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec()]);

    let limited = store
        .scan(&ScanRange {
            start: Vec::new(),
            end: vec![0xff],
            limit: 1,
            reverse: false,
        })
        .unwrap();
    assert_eq!(keys(&limited), vec![b"a".to_vec()]);

    let inverted = store
        .scan(&ScanRange {
            start: b"d".to_vec(),
            end: b"a".to_vec(),
            limit: 10,
            reverse: false,
        })
        .unwrap();
    assert!(inverted.is_empty());
}

pub(crate) fn exercise_rollback<S: KvStore>(store: &S) {
    put(store, vec![row(b"keep", b"old", 1, None)]);

    let result: Result<(), StorageError> = store.run_atomic(|txn| {
        txn.put_row(row(b"keep", b"new", 2, None))?;
        txn.put_row(row(b"added", b"x", 2, Some(5)))?;
        txn.set_version(2)?;
        txn.insert_queue_item(NewQueueItem {
            payload: b"p".to_vec(),
            encoding: ValueEncoding::Bytes,
            enqueued_at: 0,
            available_at: 0,
            dead_letter_keys: vec![b"dlq".to_vec()],
        })?;
        Err(StorageError::Corruption("abort".to_string()))
    });
    assert!(result.is_err());

    assert_eq!(store.get_row(b"keep").unwrap().unwrap().value, b"old");
    assert!(store.get_row(b"added").unwrap().is_none());
    let (version, claimed, min_expiry) = store
        .run_atomic(|txn| {
            Ok::<_, StorageError>((
                txn.version()?,
                txn.claim_queue_item(i64::MAX)?,
                txn.min_expires_at()?,
            ))
        })
        .unwrap();
    assert_eq!(version, 0);
    assert!(claimed.is_none());
    assert_eq!(min_expiry, None);
}

pub(crate) fn exercise_expiry<S: KvStore>(store: &S) {
    put(
        store,
        vec![
            row(b"a", b"", 1, Some(100)),
            row(b"b", b"", 1, Some(200)),
            row(b"c", b"", 1, Some(300)),
            row(b"d", b"", 1, None),
        ],
    );

    let (deleted, next) = store
        .run_atomic(|txn| {
            let deleted = txn.delete_expired(200)?;
            Ok::<_, StorageError>((deleted, txn.min_expires_at()?))
        })
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(next, Some(300));
    assert!(store.get_row(b"b").unwrap().is_none());
    assert!(store.get_row(b"c").unwrap().is_some());
    assert!(store.get_row(b"d").unwrap().is_some());

    // Overwriting without expiry drops the row from the expiry schedule.
    put(store, vec![row(b"c", b"", 2, None)]);
    let next = store.run_atomic(|txn| txn.min_expires_at()).unwrap();
    assert_eq!(next, None);
}

pub(crate) fn exercise_queue<S: KvStore>(store: &S) {
    let item = |available_at: i64, dlq: &[&[u8]]| NewQueueItem {
        payload: format!("msg-{available_at}").into_bytes(),
        encoding: ValueEncoding::Bytes,
        enqueued_at: 0,
        available_at,
        dead_letter_keys: dlq.iter().map(|k| k.to_vec()).collect(),
    };

    let (first, second, third) = store
        .run_atomic(|txn| {
            Ok::<_, StorageError>((
                txn.insert_queue_item(item(10, &[b"x", b"y"]))?,
                txn.insert_queue_item(item(5, &[]))?,
                txn.insert_queue_item(item(50, &[]))?,
            ))
        })
        .unwrap();
    assert!(first < second && second < third);

    // Nothing available yet.
    let claimed = store.run_atomic(|txn| txn.claim_queue_item(4)).unwrap();
    assert!(claimed.is_none());
    let next = store
        .run_atomic(|txn| txn.next_queue_available_at())
        .unwrap();
    assert_eq!(next, Some(5));

    // Lowest id wins among available items.
    let claimed = store
        .run_atomic(|txn| txn.claim_queue_item(20))
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first);
    assert!(claimed.locked);
    assert_eq!(claimed.payload, b"msg-10");
    assert_eq!(claimed.failure_count, 0);

    let dlq = store.run_atomic(|txn| txn.dead_letter_keys(first)).unwrap();
    assert_eq!(dlq, vec![b"x".to_vec(), b"y".to_vec()]);

    let claimed_next = store
        .run_atomic(|txn| txn.claim_queue_item(20))
        .unwrap()
        .unwrap();
    assert_eq!(claimed_next.id, second);

    // Locked items are skipped when looking for the next wake-up.
    let next = store
        .run_atomic(|txn| txn.next_queue_available_at())
        .unwrap();
    assert_eq!(next, Some(50));

    store
        .run_atomic(|txn| txn.requeue_item(first, 1, 30))
        .unwrap();
    let next = store
        .run_atomic(|txn| txn.next_queue_available_at())
        .unwrap();
    assert_eq!(next, Some(30));
    let again = store
        .run_atomic(|txn| txn.claim_queue_item(30))
        .unwrap()
        .unwrap();
    assert_eq!(again.id, first);
    assert_eq!(again.failure_count, 1);

    store
        .run_atomic(|txn| txn.delete_queue_item(first))
        .unwrap();
    let dlq = store.run_atomic(|txn| txn.dead_letter_keys(first)).unwrap();
    assert!(dlq.is_empty());

    let unlocked = store
        .run_atomic(|txn| txn.unlock_all_queue_items())
        .unwrap();
    assert_eq!(unlocked, 1);
    let reclaimed = store
        .run_atomic(|txn| txn.claim_queue_item(100))
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.id, second);
}

pub(crate) fn exercise_queue_ordering<S: KvStore>(store: &S) {
    // 200 items whose availability cycles through 0..50.
    let ids: Vec<(i64, i64)> = store
        .run_atomic(|txn| {
            (0..200i64)
                .map(|i| {
                    let available_at = (i * 37) % 50;
                    let id = txn.insert_queue_item(NewQueueItem {
                        payload: i.to_be_bytes().to_vec(),
                        encoding: ValueEncoding::Bytes,
                        enqueued_at: 0,
                        available_at,
                        dead_letter_keys: vec![format!("dlq-{i}").into_bytes()],
                    })?;
                    Ok::<_, StorageError>((id, available_at))
                })
                .collect::<Result<Vec<_>, StorageError>>()
        })
        .unwrap();

    let claim_all = |now: i64| {
        let mut claimed = Vec::new();
        while let Some(item) = store.run_atomic(|txn| txn.claim_queue_item(now)).unwrap() {
            assert!(item.available_at <= now);
            claimed.push(item.id);
        }
        claimed
    };

    let early: Vec<i64> = ids.iter().filter(|(_, at)| *at <= 25).map(|(id, _)| *id).collect();
    let first_pass = claim_all(25);
    assert_eq!(first_pass, early);
    assert_eq!(
        store.run_atomic(|txn| txn.next_queue_available_at()).unwrap(),
        Some(26)
    );

    // A requeued item goes back in line by id.
    store
        .run_atomic(|txn| txn.requeue_item(first_pass[0], 1, 0))
        .unwrap();
    let again = store
        .run_atomic(|txn| txn.claim_queue_item(25))
        .unwrap()
        .unwrap();
    assert_eq!(again.id, first_pass[0]);
    assert_eq!(again.failure_count, 1);

    let late: Vec<i64> = ids.iter().filter(|(_, at)| *at > 25).map(|(id, _)| *id).collect();
    assert_eq!(claim_all(49), late);
    assert_eq!(
        store.run_atomic(|txn| txn.next_queue_available_at()).unwrap(),
        None
    );

    store
        .run_atomic(|txn| {
            for (id, _) in ids.iter().step_by(2) {
                txn.delete_queue_item(*id)?;
            }
            Ok::<_, StorageError>(())
        })
        .unwrap();
    let unlocked = store
        .run_atomic(|txn| txn.unlock_all_queue_items())
        .unwrap();
    assert_eq!(unlocked, 100);
    let remaining: Vec<i64> = ids.iter().skip(1).step_by(2).map(|(id, _)| *id).collect();
    assert_eq!(claim_all(49), remaining);
    assert_eq!(
        store
            .run_atomic(|txn| txn.dead_letter_keys(remaining[0]))
            .unwrap(),
        vec![b"dlq-1".to_vec()]
    );
    assert!(store
        .run_atomic(|txn| txn.dead_letter_keys(ids[0].0))
        .unwrap()
        .is_empty());
}

pub(crate) fn exercise_close<S: KvStore>(store: &S) {
    put(store, vec![row(b"a", b"", 1, None)]);
    store.close().unwrap();
    assert!(matches!(store.close(), Err(StorageError::Closed)));
    assert!(matches!(store.get_row(b"a"), Err(StorageError::Closed)));
    let result: Result<(), StorageError> = store.run_atomic(|_| Ok(()));
    assert!(matches!(result, Err(StorageError::Closed)));
}
