// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Range listing with resumable cursors.
//!
//! A listing fetches rows in batches. After the first yielded entry the
//! scan bound on the resume side is replaced by the last yielded key and
//! one extra row is requested; the duplicate boundary row is dropped
//! again, so concatenating listings resumed from successive cursors
//! reproduces the uninterrupted sequence.

use std::collections::VecDeque;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures::Stream;

use crate::key::{unpack_key, KvKey};
use crate::storage::{Row, ScanRange};
use crate::value::KvValue;

use super::{Consistency, Kv, KvEntry, KvError, KvResult};

/// Default rows per fetch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest accepted `batch_size`.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Rows actually requested per fetch never exceed this.
const FETCH_CAP: usize = 500;

/// Which keys a listing covers.
#[derive(Debug, Clone, PartialEq)]
pub enum KvListSelector {
    /// Every key strictly below `prefix`.
    Prefix(KvKey),
    /// Keys below `prefix`, from `start` (inclusive).
    PrefixStart { prefix: KvKey, start: KvKey },
    /// Keys below `prefix`, up to `end` (exclusive).
    PrefixEnd { prefix: KvKey, end: KvKey },
    /// Keys in `[start, end)`.
    Range { start: KvKey, end: KvKey },
}

impl KvListSelector {
    pub fn prefix(prefix: KvKey) -> Self {
        KvListSelector::Prefix(prefix)
    }

    pub fn range(start: KvKey, end: KvKey) -> Self {
        KvListSelector::Range { start, end }
    }
}

/// Options for [`Kv::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvListOptions {
    /// Stop after this many entries.
    pub limit: Option<usize>,
    /// Resume after the entry this cursor was taken at.
    pub cursor: Option<String>,
    pub reverse: bool,
    pub batch_size: Option<usize>,
    pub consistency: Consistency,
}

impl KvListOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }
}

/// Byte range a selector resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

/// First key strictly below `prefix`; the bare prefix row sorts before it.
fn below_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut start = prefix.to_vec();
    start.push(0x00);
    start
}

fn after_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.push(0xff);
    end
}

fn within_prefix(prefix: &KvKey, key: &KvKey, bound: &str) -> KvResult<()> {
    if key.len() <= prefix.len() || !key.starts_with(prefix) {
        return Err(KvError::InvalidSelector(format!(
            "{bound} key {key} is not within prefix {prefix}"
        )));
    }
    Ok(())
}

pub(crate) fn resolve_selector(selector: &KvListSelector) -> KvResult<ResolvedRange> {
    match selector {
        KvListSelector::Prefix(prefix) => {
            let packed = prefix.pack()?;
            Ok(ResolvedRange {
                start: below_prefix(&packed),
                end: after_prefix(&packed),
            })
        }
        KvListSelector::PrefixStart { prefix, start } => {
            within_prefix(prefix, start, "start")?;
            let packed = prefix.pack()?;
            Ok(ResolvedRange {
                start: start.pack()?,
                end: after_prefix(&packed),
            })
        }
        KvListSelector::PrefixEnd { prefix, end } => {
            within_prefix(prefix, end, "end")?;
            let packed = prefix.pack()?;
            Ok(ResolvedRange {
                start: below_prefix(&packed),
                end: end.pack()?,
            })
        }
        KvListSelector::Range { start, end } => {
            let (start, end) = (start.pack()?, end.pack()?);
            if start > end {
                return Err(KvError::InvalidSelector(
                    "start key is greater than end key".to_string(),
                ));
            }
            Ok(ResolvedRange { start, end })
        }
    }
}

/// Encodes the resume token for the last yielded key.
pub(crate) fn encode_cursor(last_key: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(last_key)
}

/// Decodes a resume token, checking it names a key inside `range`.
pub(crate) fn decode_cursor(cursor: &str, range: &ResolvedRange) -> KvResult<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| KvError::InvalidCursor)?;
    if bytes.is_empty() || unpack_key(&bytes).is_err() {
        return Err(KvError::InvalidCursor);
    }
    if bytes < range.start || bytes >= range.end {
        return Err(KvError::InvalidCursor);
    }
    Ok(bytes)
}

fn validate_options(options: &KvListOptions) -> KvResult<()> {
    if options.limit == Some(0) {
        return Err(KvError::InvalidListOptions(
            "limit must be at least 1".to_string(),
        ));
    }
    if let Some(size) = options.batch_size {
        if size == 0 || size > MAX_BATCH_SIZE {
            return Err(KvError::InvalidListOptions(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
    }
    Ok(())
}

/// Lazily fetched sequence of entries, returned by [`Kv::list`].
///
/// Not restartable: once exhausted it stays exhausted. [`cursor`](Self::cursor)
/// reflects exactly the entries yielded so far.
pub struct KvListIterator {
    kv: Kv,
    range: ResolvedRange,
    reverse: bool,
    batch_size: usize,
    limit: Option<usize>,
    consistency: Consistency,
    yielded: usize,
    last_key: Option<Vec<u8>>,
    cursor: Option<String>,
    buffer: VecDeque<Row>,
    done: bool,
}

impl std::fmt::Debug for KvListIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvListIterator")
            .field("range", &self.range)
            .field("reverse", &self.reverse)
            .field("yielded", &self.yielded)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl KvListIterator {
    pub(crate) fn new(kv: Kv, selector: &KvListSelector, options: KvListOptions) -> KvResult<Self> {
        validate_options(&options)?;
        let range = resolve_selector(selector)?;
        let last_key = options
            .cursor
            .as_deref()
            .map(|c| decode_cursor(c, &range))
            .transpose()?;
        Ok(Self {
            kv,
            range,
            reverse: options.reverse,
            batch_size: options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            limit: options.limit,
            consistency: options.consistency,
            yielded: 0,
            last_key,
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
        })
    }

    /// Cursor positioned after the most recently yielded entry.
    pub fn cursor(&self) -> KvResult<&str> {
        self.cursor.as_deref().ok_or(KvError::CursorUnavailable)
    }

    /// Yields the next entry, fetching another batch when needed.
    pub async fn next(&mut self) -> Option<KvResult<KvEntry>> {
        loop {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                return None;
            }
            if let Some(row) = self.buffer.pop_front() {
                return Some(self.yield_row(row));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fetch_batch().await {
                self.done = true;
                return Some(Err(err));
            }
        }
    }

    /// Drains the remaining entries.
    pub async fn collect(mut self) -> KvResult<Vec<KvEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Adapts the iterator into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = KvResult<KvEntry>> {
        futures::stream::unfold(self, |mut iter| async move {
            iter.next().await.map(|item| (item, iter))
        })
    }

    async fn fetch_batch(&mut self) -> KvResult<()> {
        let mut start = self.range.start.clone();
        let mut end = self.range.end.clone();
        if let Some(last) = &self.last_key {
            if self.reverse {
                end = last.clone();
            } else {
                start = last.clone();
            }
        }
        let remaining = self
            .limit
            .map_or(usize::MAX, |limit| limit.saturating_sub(self.yielded));
        let batch_limit = self.batch_size.min(FETCH_CAP).min(remaining)
            + usize::from(self.last_key.is_some());

        let rows = self
            .kv
            .scan(
                ScanRange {
                    start,
                    end,
                    limit: batch_limit,
                    reverse: self.reverse,
                },
                self.consistency,
                "list",
            )
            .await?;
        let fetched = rows.len();

        for (i, row) in rows.into_iter().enumerate() {
            if i == 0 && self.last_key.as_deref() == Some(row.key.as_slice()) {
                continue;
            }
            self.buffer.push_back(row);
        }
        // A full batch that yields nothing new cannot advance the scan.
        if fetched < batch_limit || self.buffer.is_empty() {
            self.done = true;
        }
        Ok(())
    }

    fn yield_row(&mut self, row: Row) -> KvResult<KvEntry> {
        let key = unpack_key(&row.key)?;
        let value = KvValue::decode(row.encoding, &row.value, self.kv.codec())?;
        self.cursor = Some(encode_cursor(&row.key));
        self.last_key = Some(row.key);
        self.yielded += 1;
        Ok(KvEntry {
            key,
            value,
            versionstamp: row.versionstamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_key;
    use futures::StreamExt;

    async fn seeded(keys: &[KvKey]) -> Kv {
        let kv = Kv::open_memory(Default::default()).await.unwrap();
        for key in keys {
            kv.set(key, key.to_string()).await.unwrap();
        }
        kv
    }

    fn keys(entries: &[KvEntry]) -> Vec<KvKey> {
        entries.iter().map(|e| e.key.clone()).collect()
    }

    #[test]
    fn test_resolve_prefix() {
        let range = resolve_selector(&KvListSelector::Prefix(kv_key!["a"])).unwrap();
        assert_eq!(range.start, vec![0x02, b'a', 0x00, 0x00]);
        assert_eq!(range.end, vec![0x02, b'a', 0x00, 0xff]);

        let all = resolve_selector(&KvListSelector::Prefix(KvKey::default())).unwrap();
        assert_eq!(all.start, vec![0x00]);
        assert_eq!(all.end, vec![0xff]);
    }

    #[test]
    fn test_resolve_rejects_bad_bounds() {
        let outside = KvListSelector::PrefixStart {
            prefix: kv_key!["a"],
            start: kv_key!["b", 1i64],
        };
        assert!(matches!(
            resolve_selector(&outside),
            Err(KvError::InvalidSelector(_))
        ));
        let bare = KvListSelector::PrefixEnd {
            prefix: kv_key!["a"],
            end: kv_key!["a"],
        };
        assert!(resolve_selector(&bare).is_err());
        let inverted = KvListSelector::range(kv_key!["b"], kv_key!["a"]);
        assert!(resolve_selector(&inverted).is_err());
        let empty = KvListSelector::range(kv_key!["a"], kv_key!["a"]);
        assert!(resolve_selector(&empty).is_ok());
    }

    #[test]
    fn test_cursor_validation() {
        let range = resolve_selector(&KvListSelector::Prefix(kv_key!["a"])).unwrap();
        let inside = kv_key!["a", "b"].pack().unwrap();
        assert_eq!(decode_cursor(&encode_cursor(&inside), &range).unwrap(), inside);

        let outside = kv_key!["b"].pack().unwrap();
        assert!(decode_cursor(&encode_cursor(&outside), &range).is_err());
        let bare = kv_key!["a"].pack().unwrap();
        assert!(decode_cursor(&encode_cursor(&bare), &range).is_err());
        assert!(decode_cursor("***", &range).is_err());
        assert!(decode_cursor(&encode_cursor(&[0x7f]), &range).is_err());
    }

    #[test]
    fn test_options_validation() {
        assert!(validate_options(&KvListOptions::default()).is_ok());
        assert!(validate_options(&KvListOptions::default().with_limit(0)).is_err());
        assert!(validate_options(&KvListOptions::default().with_batch_size(0)).is_err());
        assert!(validate_options(&KvListOptions::default().with_batch_size(1001)).is_err());
        assert!(validate_options(&KvListOptions::default().with_batch_size(1000)).is_ok());
    }

    #[tokio::test]
    async fn test_prefix_excludes_bare_prefix() {
        let kv = seeded(&[kv_key!["a"], kv_key!["a", "a"], kv_key!["a", "b"], kv_key!["b"]]).await;
        let forward = kv
            .list(KvListSelector::Prefix(kv_key!["a"]), Default::default())
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&forward), vec![kv_key!["a", "a"], kv_key!["a", "b"]]);

        let reverse = kv
            .list(
                KvListSelector::Prefix(kv_key!["a"]),
                KvListOptions::default().with_reverse(true),
            )
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&reverse), vec![kv_key!["a", "b"], kv_key!["a", "a"]]);

        let last = kv
            .list(
                KvListSelector::Prefix(KvKey::default()),
                KvListOptions::default().with_reverse(true).with_limit(1),
            )
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&last), vec![kv_key!["b"]]);
    }

    #[tokio::test]
    async fn test_bare_prefix_with_single_row_batches() {
        let kv = seeded(&[kv_key!["a"], kv_key!["a", "a"], kv_key!["a", "b"], kv_key!["b"]]).await;
        for reverse in [false, true] {
            let first = if reverse { kv_key!["a", "b"] } else { kv_key!["a", "a"] };
            let limited = tokio::time::timeout(
                std::time::Duration::from_secs(3),
                kv.list(
                    KvListSelector::Prefix(kv_key!["a"]),
                    KvListOptions::default().with_reverse(reverse).with_limit(1),
                )
                .unwrap()
                .collect(),
            )
            .await
            .expect("listing with limit 1 finished")
            .unwrap();
            assert_eq!(keys(&limited), vec![first.clone()], "reverse = {reverse}");

            let batched = tokio::time::timeout(
                std::time::Duration::from_secs(3),
                kv.list(
                    KvListSelector::Prefix(kv_key!["a"]),
                    KvListOptions::default().with_reverse(reverse).with_batch_size(1),
                )
                .unwrap()
                .collect(),
            )
            .await
            .expect("listing with batch size 1 finished")
            .unwrap();
            assert_eq!(keys(&batched).len(), 2, "reverse = {reverse}");
            assert_eq!(keys(&batched)[0], first);
        }

        let only_bare = seeded(&[kv_key!["solo"]]).await;
        for reverse in [false, true] {
            let entries = tokio::time::timeout(
                std::time::Duration::from_secs(3),
                only_bare
                    .list(
                        KvListSelector::Prefix(kv_key!["solo"]),
                        KvListOptions::default().with_reverse(reverse).with_batch_size(1),
                    )
                    .unwrap()
                    .collect(),
            )
            .await
            .expect("listing over a bare key finished")
            .unwrap();
            assert!(entries.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cursor_unavailable_before_first_entry() {
        let kv = seeded(&[kv_key!["x"]]).await;
        let mut iter = kv
            .list(KvListSelector::Prefix(KvKey::default()), Default::default())
            .unwrap();
        assert!(matches!(iter.cursor(), Err(KvError::CursorUnavailable)));
        iter.next().await.unwrap().unwrap();
        assert_eq!(
            iter.cursor().unwrap(),
            encode_cursor(&kv_key!["x"].pack().unwrap())
        );
        assert!(iter.next().await.is_none());
    }

    #[tokio::test]
    async fn test_resume_across_small_batches() {
        let all: Vec<KvKey> = (0..25i64).map(|i| kv_key!["k", i]).collect();
        let kv = seeded(&all).await;

        for reverse in [false, true] {
            let mut expected = all.clone();
            if reverse {
                expected.reverse();
            }
            let mut seen = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let mut options = KvListOptions::default()
                    .with_reverse(reverse)
                    .with_limit(4)
                    .with_batch_size(3);
                if let Some(c) = cursor.take() {
                    options = options.with_cursor(c);
                }
                let mut iter = kv
                    .list(KvListSelector::Prefix(kv_key!["k"]), options)
                    .unwrap();
                let mut page = 0;
                while let Some(entry) = iter.next().await {
                    seen.push(entry.unwrap().key);
                    page += 1;
                }
                if page == 0 {
                    break;
                }
                cursor = Some(iter.cursor().unwrap().to_string());
            }
            assert_eq!(seen, expected, "reverse = {reverse}");
        }
    }

    #[tokio::test]
    async fn test_range_and_stream() {
        let kv = seeded(&[kv_key![1i64], kv_key![2i64], kv_key![3i64], kv_key![4i64]]).await;
        let entries: Vec<KvEntry> = kv
            .list(
                KvListSelector::range(kv_key![2i64], kv_key![4i64]),
                KvListOptions::default().with_batch_size(1),
            )
            .unwrap()
            .into_stream()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(keys(&entries), vec![kv_key![2i64], kv_key![3i64]]);
        assert_eq!(entries[0].value, KvValue::from("[2n]"));
    }

    #[tokio::test]
    async fn test_prefix_start_and_end() {
        let kv = seeded(&[
            kv_key!["p", 1i64],
            kv_key!["p", 2i64],
            kv_key!["p", 3i64],
            kv_key!["q"],
        ])
        .await;
        let from_two = kv
            .list(
                KvListSelector::PrefixStart {
                    prefix: kv_key!["p"],
                    start: kv_key!["p", 2i64],
                },
                Default::default(),
            )
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&from_two), vec![kv_key!["p", 2i64], kv_key!["p", 3i64]]);

        let before_three = kv
            .list(
                KvListSelector::PrefixEnd {
                    prefix: kv_key!["p"],
                    end: kv_key!["p", 3i64],
                },
                Default::default(),
            )
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(keys(&before_three), vec![kv_key!["p", 1i64], kv_key!["p", 2i64]]);
    }
}
