//! The repository side of the protocol: the backend contract (spec.md
//! component F), verb dispatch (E), the resumption adapter (G), and the
//! XML response builder (H).

pub mod dispatch;
pub mod resumption;
pub mod xml;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::model::{Header, Identify, MetadataFormat, Record, Set};
use crate::registry::MetadataRegistry;

pub use dispatch::Verb;
pub use resumption::{BatchingResumption, StatelessResumption};

/// The arguments common to both list verbs, bundled so the resumption
/// adapter's token codec (§4.4) can serialize and restore them as a
/// unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
    pub metadata_prefix: String,
    pub set: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
}

/// One page of a list response: the items plus the token for the next
/// page, or `None` if this was the last page.
///
/// `metadata_prefix` carries the `metadataPrefix` the adapter resolved
/// for this page — decoded back out of the resumption token on a
/// continuation call, since that argument is absent from a
/// continuation's own request (it's the exclusive `resumptionToken`'s
/// sibling). Callers that render metadata for a page (`ListRecords`)
/// MUST use this field rather than re-reading the request map, which is
/// empty on every page after the first. Unused (empty) for `ListSets`.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub resumption_token: Option<String>,
    pub metadata_prefix: String,
}

/// The contract a non-paging backend implements (spec.md §4.1). A
/// backend MAY return lazily-computed but finite sequences; here that is
/// simply a `Vec`, materialized eagerly, since Rust has no generator
/// sugar as cheap as Python's and the resumption adapter consumes the
/// whole sequence anyway in its stateless variant.
pub trait Repository: Send + Sync {
    fn get_record<'a>(&'a self, prefix: &'a str, identifier: &'a str) -> BoxFuture<'a, Result<Record>>;

    fn identify(&self) -> BoxFuture<'_, Result<Identify>>;

    fn list_identifiers<'a>(
        &'a self,
        prefix: &'a str,
        set: Option<&'a str>,
        from: Option<NaiveDateTime>,
        until: Option<NaiveDateTime>,
    ) -> BoxFuture<'a, Result<Vec<Header>>>;

    fn list_metadata_formats<'a>(
        &'a self,
        identifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>>;

    fn list_records<'a>(
        &'a self,
        prefix: &'a str,
        set: Option<&'a str>,
        from: Option<NaiveDateTime>,
        until: Option<NaiveDateTime>,
    ) -> BoxFuture<'a, Result<Vec<Record>>>;

    fn list_sets(&self) -> BoxFuture<'_, Result<Vec<Set>>>;
}

/// The contract a batch-aware backend implements (spec.md §4.1): the two
/// list operations additionally accept `(cursor, batch_size)` and return
/// exactly that slice, or the suffix if the sequence is shorter.
pub trait BatchingRepository: Send + Sync {
    fn get_record<'a>(&'a self, prefix: &'a str, identifier: &'a str) -> BoxFuture<'a, Result<Record>>;

    fn identify(&self) -> BoxFuture<'_, Result<Identify>>;

    #[allow(clippy::too_many_arguments)]
    fn list_identifiers<'a>(
        &'a self,
        prefix: &'a str,
        set: Option<&'a str>,
        from: Option<NaiveDateTime>,
        until: Option<NaiveDateTime>,
        cursor: usize,
        batch_size: usize,
    ) -> BoxFuture<'a, Result<Vec<Header>>>;

    fn list_metadata_formats<'a>(
        &'a self,
        identifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>>;

    #[allow(clippy::too_many_arguments)]
    fn list_records<'a>(
        &'a self,
        prefix: &'a str,
        set: Option<&'a str>,
        from: Option<NaiveDateTime>,
        until: Option<NaiveDateTime>,
        cursor: usize,
        batch_size: usize,
    ) -> BoxFuture<'a, Result<Vec<Record>>>;

    fn list_sets(&self) -> BoxFuture<'_, Result<Vec<Set>>>;
}

/// The uniform, already-paginated view a `Server` dispatches against,
/// regardless of whether it's backed by a [`StatelessResumption`]-wrapped
/// [`Repository`] or a [`BatchingResumption`]-wrapped [`BatchingRepository`].
pub trait PagingRepository: Send + Sync {
    fn get_record<'a>(&'a self, prefix: &'a str, identifier: &'a str) -> BoxFuture<'a, Result<Record>>;

    fn identify(&self) -> BoxFuture<'_, Result<Identify>>;

    fn list_metadata_formats<'a>(
        &'a self,
        identifier: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<MetadataFormat>>>;

    fn list_identifiers(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Header>>>;

    fn list_records(
        &self,
        args: ListArgs,
        token: Option<String>,
    ) -> BoxFuture<'_, Result<ListPage<Record>>>;

    fn list_sets(&self, token: Option<String>) -> BoxFuture<'_, Result<ListPage<Set>>>;
}

/// Static repository description attached once at construction (spec.md
/// Open Question (ii): cache the base URL instead of calling `identify()`
/// per request).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    /// Extra namespace declarations the embedding program wants on the
    /// `<OAI-PMH>` root, beyond the default and `xsi` namespaces.
    pub extra_namespaces: Vec<(String, String)>,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        ServerConfig {
            base_url: base_url.into(),
            extra_namespaces: Vec::new(),
        }
    }
}

/// Top-level entry point for the server side: wires a paginated backend,
/// a metadata registry, and static config together, and answers verb
/// requests with response XML.
pub struct Server<P: PagingRepository> {
    pub(crate) repository: Arc<P>,
    pub(crate) registry: Arc<MetadataRegistry>,
    pub(crate) config: ServerConfig,
}

impl<P: PagingRepository> Server<P> {
    pub fn new(repository: Arc<P>, registry: Arc<MetadataRegistry>, config: ServerConfig) -> Self {
        Server {
            repository,
            registry,
            config,
        }
    }

    /// Handle one verb request. `args` is the flat string map exactly as
    /// received from the transport (query string or form body), with
    /// `verb` still in it.
    pub async fn handle(&self, args: BTreeMap<String, String>) -> String {
        dispatch::handle(self, args).await
    }
}
