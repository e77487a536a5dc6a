// src/engine/reply.rs

//! Transport-neutral command results.

use bytes::Bytes;

use crate::types::format_f64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple status such as `OK`, `PONG` or a type name.
    Status(&'static str),
    Integer(i64),
    /// A byte string, or null.
    Bulk(Option<Bytes>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK")
    }

    pub fn null() -> Self {
        Reply::Bulk(None)
    }

    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(value.into()))
    }

    pub fn int(n: usize) -> Self {
        Reply::Integer(i64::try_from(n).unwrap_or(i64::MAX))
    }

    pub fn flag(set: bool) -> Self {
        Reply::Integer(i64::from(set))
    }

    pub fn score(score: f64) -> Self {
        Reply::bulk(format_f64(score))
    }

    pub fn opt_score(score: Option<f64>) -> Self {
        score.map_or_else(Reply::null, Reply::score)
    }

    pub fn array(items: impl IntoIterator<Item = Bytes>) -> Self {
        Reply::Array(items.into_iter().map(|b| Reply::Bulk(Some(b))).collect())
    }

    pub fn nullable_array(items: impl IntoIterator<Item = Option<Bytes>>) -> Self {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }
}

impl From<Option<Bytes>> for Reply {
    fn from(value: Option<Bytes>) -> Self {
        Reply::Bulk(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers() {
        assert_eq!(Reply::flag(true), Reply::Integer(1));
        assert_eq!(Reply::int(3), Reply::Integer(3));
        assert_eq!(Reply::score(2.5), Reply::Bulk(Some(Bytes::from_static(b"2.5"))));
        assert_eq!(Reply::opt_score(None), Reply::Bulk(None));
        assert_eq!(
            Reply::nullable_array([Some(Bytes::from_static(b"a")), None]),
            Reply::Array(vec![Reply::Bulk(Some(Bytes::from_static(b"a"))), Reply::Bulk(None)])
        );
    }
}
