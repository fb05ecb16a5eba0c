//! # trac-sync
//!
//! Batch ETL from a Trac bug tracker into an Elasticsearch-compatible index,
//! plus daily ticket statistics computed from that index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │    Trac     │──▶│  Transform   │──▶│  hub index  │
//! │  (XML-RPC)  │   │ ticket+log   │   │  (wptrac)   │
//! └─────────────┘   └──────────────┘   └──────┬──────┘
//!                                             │
//!                         ┌───────────────────┘
//!                         ▼
//!                   ┌──────────────┐   ┌─────────────────┐
//!                   │ Replay/apply │──▶│  local index    │
//!                   │  per window  │   │ (trac, trac-data)│
//!                   └──────────────┘   └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! trac-sync sync 51234                     # index one ticket
//! trac-sync sync 51234 51235 51240         # index several, stop on failure
//! trac-sync delete 51234                   # remove a ticket document
//! trac-sync stats --start 1700000000000 --end 1700086400000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Ticket, update and snapshot types |
//! | [`terms`] | Keyword/focus term splitting |
//! | [`encoding`] | Re-encoding of rejected free text |
//! | [`update`] | Change-log normalization |
//! | [`transform`] | Ticket document construction |
//! | [`sync`] | Fetch-transform-load with encoding retry |
//! | [`replay`] | Created-state reconstruction |
//! | [`stats`] | Rollup aggregation and snapshots |
//! | [`history`] | Windowed replay and stats job |
//! | [`tracker`] | Tracker trait and Trac XML-RPC client |
//! | [`xmlrpc`] | XML-RPC codec |
//! | [`index`] | Search index trait and Elasticsearch client |
//! | [`error`] | Collaborator error types |

pub mod config;
pub mod encoding;
pub mod error;
pub mod history;
pub mod index;
pub mod models;
pub mod replay;
pub mod stats;
pub mod sync;
pub mod terms;
pub mod tracker;
pub mod transform;
pub mod update;
pub mod xmlrpc;
