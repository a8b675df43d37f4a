//! Lazy cross-batch iteration (spec.md component J), grounded on
//! `ResumptionListGenerator` in `oaipmh.client` (original_source):
//!
//! ```text
//! def ResumptionListGenerator(firstBatch, nextBatch):
//!     result, token = firstBatch()
//!     while 1:
//!         for item in result:
//!             yield item
//!         if token is None:
//!             break
//!         result, token = nextBatch(token)
//! ```
//!
//! The original is a Python generator suspended across HTTP round-trips.
//! Per the REDESIGN FLAGS note on lazy cross-call sequences, this crate
//! reimplements it as an explicit [`futures::stream::Stream`] built with
//! [`futures::stream::unfold`] rather than hand-rolling a `Future`/`Stream`
//! state machine: the first page isn't fetched until the stream is first
//! polled, keeping the whole chain — including the initial request — lazy.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;

type Page<T> = (Vec<T>, Option<String>);

enum State<T, FFirst> {
    NotStarted(FFirst),
    Buffered { queue: VecDeque<T>, token: Option<String> },
    Done,
}

/// Build a stream over a resumption-token chain. `first_batch` fetches the
/// first page on first poll; `fetch_next` is called with only the
/// server-issued token to retrieve each subsequent page (spec.md §4.8:
/// "fetch the next batch using only the token (plus verb)").
///
/// Terminates when a batch carries no token, or when a fetched batch turns
/// out to be empty — the latter defends against a server that returns a
/// token but no items, per spec.md §4.8.
pub(super) fn resumption_stream<'c, T, FFirst, FNext>(
    first_batch: FFirst,
    fetch_next: FNext,
) -> BoxStream<'c, Result<T>>
where
    T: Send + 'c,
    FFirst: FnOnce() -> BoxFuture<'c, Result<Page<T>>> + Send + 'c,
    FNext: Fn(String) -> BoxFuture<'c, Result<Page<T>>> + Send + 'c,
{
    let initial = State::NotStarted(first_batch);

    stream::unfold((initial, fetch_next), move |(state, fetch_next)| async move {
        let (mut queue, mut token) = match state {
            State::Done => return None,
            State::NotStarted(first_batch) => match first_batch().await {
                Err(err) => return Some((Err(err), (State::Done, fetch_next))),
                Ok((items, token)) => (VecDeque::from(items), token),
            },
            State::Buffered { queue, token } => (queue, token),
        };
        loop {
            if let Some(item) = queue.pop_front() {
                return Some((Ok(item), (State::Buffered { queue, token }, fetch_next)));
            }
            let next_token = token.take()?;
            match fetch_next(next_token).await {
                Err(err) => return Some((Err(err), (State::Done, fetch_next))),
                Ok((next_items, next_token)) => {
                    if next_items.is_empty() {
                        return None;
                    }
                    queue = next_items.into();
                    token = next_token;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn yields_first_batch_without_fetching_more_when_token_is_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let s = resumption_stream::<i32, _, _>(
            || async { Ok((vec![1, 2, 3], None)) }.boxed(),
            move |_token| {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok((vec![], None)) }.boxed()
            },
        );
        let items: Vec<i32> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_batch_is_not_fetched_until_polled() {
        let started = Arc::new(AtomicUsize::new(0));
        let started2 = started.clone();
        let s = resumption_stream::<i32, _, _>(
            move || {
                started2.fetch_add(1, Ordering::SeqCst);
                async { Ok((vec![1], None)) }.boxed()
            },
            |_token| async { Ok((vec![], None)) }.boxed(),
        );
        assert_eq!(started.load(Ordering::SeqCst), 0);
        let items: Vec<i32> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1]);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chains_across_batches_until_token_exhausted() {
        let s = resumption_stream::<i32, _, _>(
            || async { Ok((vec![1, 2], Some("a".to_string()))) }.boxed(),
            |token| {
                async move {
                    match token.as_str() {
                        "a" => Ok((vec![3, 4], Some("b".to_string()))),
                        "b" => Ok((vec![5], None)),
                        _ => panic!("unexpected token"),
                    }
                }
                .boxed()
            },
        );
        let items: Vec<i32> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn stops_on_empty_batch_even_with_a_token_pending() {
        let s = resumption_stream::<i32, _, _>(
            || async { Ok((vec![1], Some("a".to_string()))) }.boxed(),
            |_token| async { Ok((vec![], Some("b".to_string()))) }.boxed(),
        );
        let items: Vec<i32> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn a_failed_page_surfaces_as_one_error_then_ends() {
        use crate::error::OaiError;
        let s = resumption_stream::<i32, _, _>(
            || async { Ok((vec![1], Some("a".to_string()))) }.boxed(),
            |_token| async { Err(OaiError::BadResumptionToken("a".to_string())) }.boxed(),
        );
        let items: Vec<Result<i32>> = s.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].as_ref().is_ok());
        assert!(items[1].as_ref().is_err());
    }
}
