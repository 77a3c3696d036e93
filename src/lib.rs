//! # azrow
//!
//! Typed access to a partitioned table service plus the Azure AD plumbing
//! needed to call Microsoft Graph and SharePoint.
//!
//! - [`tables`] – filter compiler, table accessor, typed tables, overflow columns
//! - [`identity`] – app-only / user tokens, tenant discovery, request configs

pub use azrow_identity as identity;
pub use azrow_tables as tables;

pub use azrow_tables::{
    compile, Entity, EntityKeys, EntityValue, Filter, FilterStatement, Join, OperationResult,
    Operator, ScanOptions, Table, TableAccessor, TableStorageConfig, UpdateMode,
};
