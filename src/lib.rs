// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Execution core for a single-block SQL `SELECT`: binding a statement
//! against its tables (`Select::init`), planning an access path and
//! physical strategy over it (`Select::prepare`), and running it
//! (`Select::query_without_cache`) either into a materialized result or a
//! pull-based lazy one.
//!
//! This crate owns none of parsing, storage, or transactions — it is the
//! layer in between, driven by a caller that already has a bound schema
//! and table filters to hand it.

pub mod access_path;
pub mod config;
pub mod error;
pub mod executor;
pub mod expression;
pub mod exprkit;
pub mod lazy;
pub mod metrics;
pub mod result_sink;
pub mod row;
pub mod select;
pub mod table_filter;
pub mod testutil;
pub mod value;

pub use error::{Error, Result};
pub use executor::QueryOutcome;
pub use lazy::LazyResult;
pub use select::{OrderItem, OrderKey, Select};
