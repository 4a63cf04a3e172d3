// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bulk fetch API endpoint
//!
//! Provides the `/fetch/bulk` HTTP endpoint.

pub mod handler;
pub mod request;
pub mod response;

pub use handler::bulk_handler;
pub use request::BulkApiRequest;
pub use response::BulkApiResponse;
