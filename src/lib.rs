//! Core library for the committee-sync command line application.
//!
//! The library imports committee rosters from spreadsheet exports and
//! reconciles them with a CRM. Workbook adapters live under
//! [`committees::io`], the roster model inside [`committees::model`], CRM
//! access behind the [`committees::crm::CrmApi`] trait, and the membership
//! reconciliation in [`committees::current`], [`committees::diff`] and
//! [`committees::apply`], orchestrated by [`committees::sync`].

pub mod committees;

pub use committees::{
    Result, SyncError, apply, config, context, crm, current, diff, error, io, model, roles, sync,
    tools,
};
