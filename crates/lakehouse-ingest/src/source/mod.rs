//! Clients for the systems raw data is captured from

pub mod http;
pub mod relational;

pub use http::{HttpResponse, HttpSource, ReqwestSource};
pub use relational::{ChangeFilter, PgSource, RelationalSource, Row, SqlValue};
