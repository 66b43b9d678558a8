//! Testing utilities: a scripted HTTP transport and server fixtures.
//!
//! # Example
//!
//! ```rust,ignore
//! use formsync_core::testing::{fixtures, MockHttp};
//!
//! let http = MockHttp::new();
//! let server = AggregateServer::new("https://agg.example.org");
//! fixtures::register_form(&http, &server, "household").await;
//! let cursors = fixtures::register_id_pages(&http, &server, "household", &ids, 100, false).await;
//! ```

pub mod fixtures;
mod mock_http;

pub use mock_http::{MockHttp, RecordedRequest};
