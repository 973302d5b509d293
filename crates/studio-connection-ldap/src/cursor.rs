//! ldap3 search cursor.

use async_trait::async_trait;
use ldap3::{SearchEntry, SearchStream};
use studio_connection::error::ConnectionResult;
use studio_connection::operation::SearchResponse;
use studio_connection::transport::SearchCursor;

use crate::convert;

/// Streams the responses of one ldap3 search.
pub struct Ldap3SearchCursor {
    stream: SearchStream<'static, String, Vec<String>>,
    done: bool,
}

impl Ldap3SearchCursor {
    pub(crate) fn new(stream: SearchStream<'static, String, Vec<String>>) -> Self {
        Self {
            stream,
            done: false,
        }
    }
}

#[async_trait]
impl SearchCursor for Ldap3SearchCursor {
    async fn next(&mut self) -> ConnectionResult<Option<SearchResponse>> {
        if self.done {
            return Ok(None);
        }

        loop {
            match self.stream.next().await.map_err(convert::operation_error)? {
                Some(entry) if entry.is_intermediate() => continue,
                Some(entry) if entry.is_ref() => {
                    return Ok(Some(SearchResponse::Reference(ldap3::parse_refs(entry.0))));
                }
                Some(entry) => {
                    return Ok(Some(SearchResponse::Entry(convert::entry(
                        SearchEntry::construct(entry),
                    ))));
                }
                None => {
                    self.done = true;
                    let result = self.stream.finish().await;
                    return Ok(Some(SearchResponse::Done(convert::operation_result(result))));
                }
            }
        }
    }
}
