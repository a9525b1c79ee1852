//! Data layer of the invoice-management backend: provisioning of
//! authenticated connections to the managed PostgreSQL server, with a
//! process-wide cache for the short-lived database token.

pub mod db;
