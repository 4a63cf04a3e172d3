// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Single fetch API endpoint
//!
//! Provides the `/fetch` HTTP endpoint.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::fetch_handler;
pub use request::FetchApiRequest;
pub use response::{ContentEncoding, FetchApiResponse, ItemError};
