//! Loads the optional tuning files `CoreConfig::db_options_file` and
//! `log_options_file` point at.
//!
//! Both are directories in RocksDB's own `OPTIONS-<seq>` dump format (the
//! format `Options::load_latest` reads and the same one the `ldb`/
//! `sst_dump` tools produce), not an ad hoc ini file this crate invents. A
//! deployment tunes an instance by pointing the relevant field at a
//! directory holding one of those dumps; leaving it unset keeps RocksDB's
//! compiled-in defaults plus whatever `CoreConfig`'s own fields set.

use crate::error::Result;
use rocksdb::{Cache, Env, Options};
use std::path::Path;

/// Base `Options` for an engine, loaded from `dir` if given. The caller
/// still applies its own `create_if_missing`/`set_wal_dir`/column-family
/// setup on top of whatever this returns.
pub(crate) fn base_options(dir: Option<&Path>) -> Result<Options> {
    match dir {
        Some(dir) => {
            let env = Env::new()?;
            let cache = Cache::new_lru_cache(8 * 1024 * 1024);
            let (opts, _cf_descriptors) = Options::load_latest(dir, env, false, cache)?;
            Ok(opts)
        }
        None => Ok(Options::default()),
    }
}
