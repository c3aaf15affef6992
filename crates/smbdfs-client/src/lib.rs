#![warn(missing_docs)]

//! smbdfs client subsystem: DFS path resolution for SMB2/SMB3 clients.
//!
//! Paths addressing a DFS namespace are rewritten to the file servers
//! backing them before any I/O is issued. Resolution results are kept in a
//! referral cache (longest-prefix matched) and a domain cache; the only
//! network traffic is referral requests sent over `IPC$`.

pub mod config;
pub mod domain_cache;
pub mod error;
pub mod exchange;
pub mod namespace;
pub mod path;
pub mod path_resolver;
pub mod referral_cache;
pub mod resolver;
pub mod session;
pub mod stats;

pub use config::DfsConfig;
pub use error::{DfsError, ExchangeError, Result};
pub use path::SmbPath;
pub use path_resolver::{path_resolver_for, DfsPathResolver, NoopPathResolver, PathResolver};
pub use resolver::{DfsResolver, ResolvedPath};
