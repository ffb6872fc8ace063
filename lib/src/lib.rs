// Copyright 2024 The Grit Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core library for Grit, a content-addressed version control system.
//!
//! The crate covers the storage and consistency machinery of a repository:
//! immutable objects addressed by the SHA-1 of their canonical bytes, the
//! binary staging index, loose references with a symbolic HEAD, the commit
//! pipeline, and the engine that moves the working directory between
//! snapshots atomically. Command dispatch, output formatting, and the
//! layered configuration store live outside this crate; the library never
//! writes to standard streams and surfaces typed errors instead of exiting.

#![deny(unused_must_use)]

pub mod branch;
pub mod cancel;
pub mod commit_builder;
pub mod diff;
pub mod file_util;
pub mod hex_util;
pub mod history;
pub mod index;
pub mod object;
pub mod object_id;
pub mod object_store;
pub mod refs;
pub mod repo;
pub mod repo_path;
pub mod settings;
pub mod tree_builder;
pub mod working_copy;
