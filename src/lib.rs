//! Transactional editing of remote server configuration.
//!
//! Changes are staged as [`edit::ActionRecord`]s through an
//! [`edit::Editor`], applied by a [`authority::RemoteAuthority`] as one
//! all-or-nothing transaction, and then announced by the per-domain
//! [`manager::Manager`] that owns the affected cache. The
//! [`registry::ConnectionRegistry`] keeps the managers and service proxies
//! of every connection.

pub mod authority;
pub mod commons;
pub mod config;
pub mod constants;
pub mod edit;
pub mod manager;
pub mod model;
pub mod registry;
