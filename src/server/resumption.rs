//! The resumption engine (spec.md component G): two adapters that turn a
//! [`Repository`] or [`BatchingRepository`] into a [`PagingRepository`],
//! plus the token codec they share.

use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};

use crate::datestamp::{self, Granularity};
use crate::error::{OaiError, Result};
use crate::model::{Header, Identify, MetadataFormat, Record, Set};

use super::{BatchingRepository, ListArgs, ListPage, PagingRepository, Repository};

/// Encode a key-sorted field map as an opaque resumption token.
///
/// Grounded on spec.md §4.4: form a key-sorted, URL-encoded string from
/// the fields, then apply one more layer of percent-encoding on top so
/// the whole thing is opaque to the transport. This doubles up on
/// encoding (the inner values are already percent-encoded); see
/// DESIGN.md for why that redundancy is kept rather than simplified
/// away.
fn encode_token(fields: &BTreeMap<String, String>) -> String {
    let inner = fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    urlencoding::encode(&inner).into_owned()
}

fn decode_token(token: &str) -> Result<BTreeMap<String, String>> {
    let malformed = || OaiError::BadResumptionToken(token.to_string());

    let inner = urlencoding::decode(token).map_err(|_| malformed())?;
    let mut fields = BTreeMap::new();
    if inner.is_empty() {
        return Ok(fields);
    }
    for pair in inner.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().ok_or_else(malformed)?;
        let value = parts.next().ok_or_else(malformed)?;
        let key = urlencoding::decode(key).map_err(|_| malformed())?;
        let value = urlencoding::decode(value).map_err(|_| malformed())?;
        fields.insert(key.into_owned(), value.into_owned());
    }
    Ok(fields)
}

fn list_args_to_fields(args: &ListArgs, cursor: usize) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("metadataPrefix".to_string(), args.metadata_prefix.clone());
    if let Some(set) = &args.set {
        fields.insert("set".to_string(), set.clone());
    }
    if let Some(from) = args.from {
        fields.insert(
            "from".to_string(),
            datestamp::serialize(from, Granularity::Second),
        );
    }
    if let Some(until) = args.until {
        fields.insert(
            "until".to_string(),
            datestamp::serialize(until, Granularity::Second),
        );
    }
    fields.insert("cursor".to_string(), cursor.to_string());
    fields
}

fn fields_to_list_args(token: &str, fields: &BTreeMap<String, String>) -> Result<(ListArgs, usize)> {
    let malformed = || OaiError::BadResumptionToken(token.to_string());

    let metadata_prefix = fields.get("metadataPrefix").cloned().ok_or_else(malformed)?;
    let set = fields.get("set").cloned();
    let from = fields
        .get("from")
        .map(|s| datestamp::parse(s, false))
        .transpose()
        .map_err(|_| malformed())?;
    let until = fields
        .get("until")
        .map(|s| datestamp::parse(s, true))
        .transpose()
        .map_err(|_| malformed())?;
    let cursor: usize = fields
        .get("cursor")
        .ok_or_else(malformed)?
        .parse()
        .map_err(|_| malformed())?;

    Ok((
        ListArgs {
            metadata_prefix,
            set,
            from,
            until,
        },
        cursor,
    ))
}

fn cursor_only_fields(cursor: usize) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("cursor".to_string(), cursor.to_string());
    fields
}

fn fields_to_cursor(token: &str, fields: &BTreeMap<String, String>) -> Result<usize> {
    fields
        .get("cursor")
        .ok_or_else(|| OaiError::BadResumptionToken(token.to_string()))?
        .parse()
        .map_err(|_| OaiError::BadResumptionToken(token.to_string()))
}

fn slice_page<T: Clone>(
    all: Vec<T>,
    cursor: usize,
    batch_size: usize,
) -> (Vec<T>, Option<usize>) {
    let start = cursor.min(all.len());
    let end = (cursor + batch_size).min(all.len());
    let items = all[start..end].to_vec();
    let next_cursor = if end < all.len() { Some(end) } else { None };
    (items, next_cursor)
}

/// Wraps a non-paging [`Repository`]. Re-executes the full backend query
/// on every page and slices it in memory.
///
/// This is correct for stable result sets but O(N·pages): each page pays
/// for materializing the entire sequence again. It exists for backends
/// that have no efficient way to resume a cursor themselves; a backend
/// that can should implement [`BatchingRepository`] and use
/// [`BatchingResumption`] instead.
pub struct StatelessResumption<R: Repository> {
    repository: R,
    batch_size: usize,
}

impl<R: Repository> StatelessResumption<R> {
    pub fn new(repository: R, batch_size: usize) -> Self {
        StatelessResumption {
            repository,
            batch_size,
        }
    }
}

impl<R: Repository> PagingRepository for StatelessResumption<R> {
    fn get_record<'a>(
        &'a self,
        prefix: &'a str,
        identifier: &'a str,
    ) -> BoxFuture<'a, Result<Record>> {
        self.repository.get_record(prefix, identifier)
    }

    fn identify(&self) -> BoxFuture<'_, Result<Identify>> {
        self.repository.identify()
    }

    fn list_metadata_formats<'a>(
        &'a self,
        identifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>> {
        self.repository.list_metadata_formats(identifier)
    }

    fn list_identifiers(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Header>>> {
        async move {
            let (args, cursor) = match &token {
                None => (args, 0),
                Some(t) => {
                    let fields = decode_token(t)?;
                    fields_to_list_args(t, &fields)?
                }
            };
            let all = self
                .repository
                .list_identifiers(
                    &args.metadata_prefix,
                    args.set.as_deref(),
                    args.from,
                    args.until,
                )
                .await?;
            if token.is_none() && all.is_empty() {
                return Err(OaiError::NoRecordsMatch);
            }
            let (items, next_cursor) = slice_page(all, cursor, self.batch_size);
            let resumption_token =
                next_cursor.map(|c| encode_token(&list_args_to_fields(&args, c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: args.metadata_prefix,
            })
        }
        .boxed()
    }

    fn list_records(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Record>>> {
        async move {
            let (args, cursor) = match &token {
                None => (args, 0),
                Some(t) => {
                    let fields = decode_token(t)?;
                    fields_to_list_args(t, &fields)?
                }
            };
            let all = self
                .repository
                .list_records(
                    &args.metadata_prefix,
                    args.set.as_deref(),
                    args.from,
                    args.until,
                )
                .await?;
            if token.is_none() && all.is_empty() {
                return Err(OaiError::NoRecordsMatch);
            }
            let (items, next_cursor) = slice_page(all, cursor, self.batch_size);
            let resumption_token =
                next_cursor.map(|c| encode_token(&list_args_to_fields(&args, c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: args.metadata_prefix,
            })
        }
        .boxed()
    }

    fn list_sets(&self, token: Option<String>) -> BoxFuture<'_, Result<ListPage<Set>>> {
        async move {
            let cursor = match &token {
                None => 0,
                Some(t) => fields_to_cursor(t, &decode_token(t)?)?,
            };
            let all = self.repository.list_sets().await?;
            let (items, next_cursor) = slice_page(all, cursor, self.batch_size);
            let resumption_token = next_cursor.map(|c| encode_token(&cursor_only_fields(c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: String::new(),
            })
        }
        .boxed()
    }
}

/// Wraps a [`BatchingRepository`]: pushes cursor/batch_size down to the
/// backend and requests one extra item per page to detect end-of-stream
/// without a second round trip.
pub struct BatchingResumption<R: BatchingRepository> {
    repository: R,
    batch_size: usize,
}

impl<R: BatchingRepository> BatchingResumption<R> {
    pub fn new(repository: R, batch_size: usize) -> Self {
        BatchingResumption {
            repository,
            batch_size,
        }
    }

    fn finish<T>(&self, mut items: Vec<T>, cursor: usize) -> (Vec<T>, Option<usize>) {
        let has_more = items.len() > self.batch_size;
        if has_more {
            items.truncate(self.batch_size);
        }
        let next_cursor = if has_more { Some(cursor + self.batch_size) } else { None };
        (items, next_cursor)
    }
}

impl<R: BatchingRepository> PagingRepository for BatchingResumption<R> {
    fn get_record<'a>(
        &'a self,
        prefix: &'a str,
        identifier: &'a str,
    ) -> BoxFuture<'a, Result<Record>> {
        self.repository.get_record(prefix, identifier)
    }

    fn identify(&self) -> BoxFuture<'_, Result<Identify>> {
        self.repository.identify()
    }

    fn list_metadata_formats<'a>(
        &'a self,
        identifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>> {
        self.repository.list_metadata_formats(identifier)
    }

    fn list_identifiers(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Header>>> {
        async move {
            let (args, cursor) = match &token {
                None => (args, 0),
                Some(t) => {
                    let fields = decode_token(t)?;
                    fields_to_list_args(t, &fields)?
                }
            };
            let result = self
                .repository
                .list_identifiers(
                    &args.metadata_prefix,
                    args.set.as_deref(),
                    args.from,
                    args.until,
                    cursor,
                    self.batch_size + 1,
                )
                .await?;
            if token.is_none() && result.is_empty() {
                return Err(OaiError::NoRecordsMatch);
            }
            let (items, next_cursor) = self.finish(result, cursor);
            let resumption_token =
                next_cursor.map(|c| encode_token(&list_args_to_fields(&args, c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: args.metadata_prefix,
            })
        }
        .boxed()
    }

    fn list_records(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Record>>> {
        async move {
            let (args, cursor) = match &token {
                None => (args, 0),
                Some(t) => {
                    let fields = decode_token(t)?;
                    fields_to_list_args(t, &fields)?
                }
            };
            let result = self
                .repository
                .list_records(
                    &args.metadata_prefix,
                    args.set.as_deref(),
                    args.from,
                    args.until,
                    cursor,
                    self.batch_size + 1,
                )
                .await?;
            if token.is_none() && result.is_empty() {
                return Err(OaiError::NoRecordsMatch);
            }
            let (items, next_cursor) = self.finish(result, cursor);
            let resumption_token =
                next_cursor.map(|c| encode_token(&list_args_to_fields(&args, c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: args.metadata_prefix,
            })
        }
        .boxed()
    }

    /// `listSets` has no cursor/batch_size in either backend contract
    /// (matching `IBatchingOAI.listSets()` in the original, which takes
    /// no resumption parameters even in the batching interface) — so
    /// paging sets always uses the materialize-and-slice strategy, same
    /// as the stateless adapter.
    fn list_sets(&self, token: Option<String>) -> BoxFuture<'_, Result<ListPage<Set>>> {
        async move {
            let cursor = match &token {
                None => 0,
                Some(t) => fields_to_cursor(t, &decode_token(t)?)?,
            };
            let all = self.repository.list_sets().await?;
            let (items, next_cursor) = slice_page(all, cursor, self.batch_size);
            let resumption_token = next_cursor.map(|c| encode_token(&cursor_only_fields(c)));
            Ok(ListPage {
                items,
                resumption_token,
                metadata_prefix: String::new(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Header;
    use chrono::NaiveDate;
    use futures::future::FutureExt;

    fn dt(y: i32, m: u32, d: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    struct FakeRepo {
        headers: Vec<Header>,
    }

    impl FakeRepo {
        fn with_ids(n: usize) -> Self {
            FakeRepo {
                headers: (0..n)
                    .map(|i| Header::new(i.to_string(), dt(2004, 1, 1)))
                    .collect(),
            }
        }
    }

    impl Repository for FakeRepo {
        fn get_record<'a>(&'a self, _p: &'a str, _i: &'a str) -> BoxFuture<'a, Result<Record>> {
            async { unimplemented!() }.boxed()
        }

        fn identify(&self) -> BoxFuture<'_, Result<Identify>> {
            async { unimplemented!() }.boxed()
        }

        fn list_identifiers<'a>(
            &'a self,
            _prefix: &'a str,
            _set: Option<&'a str>,
            _from: Option<chrono::NaiveDateTime>,
            _until: Option<chrono::NaiveDateTime>,
        ) -> BoxFuture<'a, Result<Vec<Header>>> {
            async move { Ok(self.headers.clone()) }.boxed()
        }

        fn list_metadata_formats<'a>(
            &'a self,
            _identifier: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>> {
            async { Ok(vec![]) }.boxed()
        }

        fn list_records<'a>(
            &'a self,
            _prefix: &'a str,
            _set: Option<&'a str>,
            _from: Option<chrono::NaiveDateTime>,
            _until: Option<chrono::NaiveDateTime>,
        ) -> BoxFuture<'a, Result<Vec<Record>>> {
            async { Ok(vec![]) }.boxed()
        }

        fn list_sets(&self) -> BoxFuture<'_, Result<Vec<Set>>> {
            async { Ok(vec![]) }.boxed()
        }
    }

    fn base_args() -> ListArgs {
        ListArgs {
            metadata_prefix: "oai_dc".to_string(),
            set: None,
            from: None,
            until: None,
        }
    }

    #[tokio::test]
    async fn stateless_adapter_yields_whole_sequence_across_pages() {
        let adapter = StatelessResumption::new(FakeRepo::with_ids(100), 10);
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = adapter
                .list_identifiers(base_args(), token.clone())
                .await
                .unwrap();
            seen.extend(page.items.into_iter().map(|h| h.identifier));
            token = page.resumption_token;
            if token.is_none() {
                break;
            }
        }
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn stateless_adapter_signals_no_records_match_on_empty_first_page() {
        let adapter = StatelessResumption::new(FakeRepo::with_ids(0), 10);
        let result = adapter.list_identifiers(base_args(), None).await;
        assert!(matches!(result, Err(OaiError::NoRecordsMatch)));
    }

    #[tokio::test]
    async fn malformed_token_is_bad_resumption_token() {
        let adapter = StatelessResumption::new(FakeRepo::with_ids(10), 10);
        let result = adapter
            .list_identifiers(base_args(), Some("foobar".to_string()))
            .await;
        assert!(matches!(result, Err(OaiError::BadResumptionToken(_))));
    }

    struct FakeBatchingRepo {
        headers: Vec<Header>,
    }

    impl BatchingRepository for FakeBatchingRepo {
        fn get_record<'a>(&'a self, _p: &'a str, _i: &'a str) -> BoxFuture<'a, Result<Record>> {
            async { unimplemented!() }.boxed()
        }

        fn identify(&self) -> BoxFuture<'_, Result<Identify>> {
            async { unimplemented!() }.boxed()
        }

        fn list_identifiers<'a>(
            &'a self,
            _prefix: &'a str,
            _set: Option<&'a str>,
            _from: Option<chrono::NaiveDateTime>,
            _until: Option<chrono::NaiveDateTime>,
            cursor: usize,
            batch_size: usize,
        ) -> BoxFuture<'a, Result<Vec<Header>>> {
            async move {
                let end = (cursor + batch_size).min(self.headers.len());
                Ok(self.headers[cursor.min(self.headers.len())..end].to_vec())
            }
            .boxed()
        }

        fn list_metadata_formats<'a>(
            &'a self,
            _identifier: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>> {
            async { Ok(vec![]) }.boxed()
        }

        fn list_records<'a>(
            &'a self,
            _prefix: &'a str,
            _set: Option<&'a str>,
            _from: Option<chrono::NaiveDateTime>,
            _until: Option<chrono::NaiveDateTime>,
            _cursor: usize,
            _batch_size: usize,
        ) -> BoxFuture<'a, Result<Vec<Record>>> {
            async { Ok(vec![]) }.boxed()
        }

        fn list_sets(&self) -> BoxFuture<'_, Result<Vec<Set>>> {
            async { Ok(vec![]) }.boxed()
        }
    }

    #[tokio::test]
    async fn batching_adapter_yields_whole_sequence_across_pages() {
        let repo = FakeBatchingRepo {
            headers: (0..100)
                .map(|i| Header::new(i.to_string(), dt(2004, 1, 1)))
                .collect(),
        };
        let adapter = BatchingResumption::new(repo, 10);
        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = adapter
                .list_identifiers(base_args(), token.clone())
                .await
                .unwrap();
            seen.extend(page.items.into_iter().map(|h| h.identifier));
            token = page.resumption_token;
            if token.is_none() {
                break;
            }
        }
        let expected: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}
