//! Durable Store Tests Module
//!
//! Backend behaviour shared by the relational and document stores, plus
//! concurrent append tests through the record store.

pub mod concurrent_test;
