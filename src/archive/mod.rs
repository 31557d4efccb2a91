//! # Archive Module
//!
//! Reconciles local records with the remote archive host.
//!
//! This module handles:
//! - Probing the archive host for reachability
//! - Listing remote record files by stamp range
//! - Fetching records into the staging area and uploading pending ones
//! - Assembling fetched records into one dataset for analysis

pub mod client;
pub mod query;
pub mod transport;

pub use client::{FetchOutcome, RemoteArchiveClient};
pub use query::{ArchiveAssembler, ArchiveDataset, DatasetFrame};
pub use transport::{ArchiveTransport, SshTransport};
