//! Core engine: the scan → reconcile → mark → prune loop.

pub mod extractor;
pub mod selector;
pub mod marker;
pub mod store;
pub mod poller;
