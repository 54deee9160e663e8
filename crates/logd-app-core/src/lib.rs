// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for logd binaries: a storage-agnostic config
//! port/service, and the server's own configuration document (spec.md §6
//! "Configuration").

pub mod config;
pub mod server_config;
