//! HTTP transport abstraction.
//!
//! The pull protocol only issues `GET` requests and classifies the responses.
//! [`ReqwestHttp`] is the production implementation; tests use
//! `testing::MockHttp`.

mod client;
mod types;

pub use client::ReqwestHttp;
pub use types::*;
