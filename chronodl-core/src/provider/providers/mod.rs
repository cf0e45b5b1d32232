//! Thin per-provider adapters translating the uniform `Provider` contract
//! into each service's wire protocol (§4.1, §9 "Heterogeneous
//! search-function signatures ... disappear under the uniform trait
//! contract above; thin per-provider adapters handle the wire-specific
//! parameter names").

pub mod annas_archive;
pub mod bnf_gallica;
pub mod ddb;
pub mod dpla;
pub mod europeana;
pub mod google_books;
pub mod internet_archive;
pub mod loc;

mod common;
