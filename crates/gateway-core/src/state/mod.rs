//! Persistent order state.
//!
//! The order store is the only component that writes order records. Every
//! mutation after creation goes through a compare-and-set against the state
//! the caller last observed.

pub mod order;

pub use order::{OrderStore, OrderStoreError};
