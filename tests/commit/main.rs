//! Commit Integration Tests
//!
//! End-to-end tests of the optimistic commit path through the `Table` API:
//! rebasing, conflicts, naming schemes and external manifest stores.

#[path = "../common/mod.rs"]
mod common;

mod conservatism;
mod external_store;
mod naming;
mod scenarios;
mod writers;
