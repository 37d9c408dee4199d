//! LMDB environment setup.

use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use tracing::info;

use lattice_store::{KvEngine, KvRead, KvWrite, StoreError, Table, WriteOverlay, WriterGate};

use crate::transaction::{LmdbRead, LmdbWrite};
use crate::LmdbError;

/// How hard a commit pushes data to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Flush data and metadata on every commit.
    #[default]
    Always,
    /// Skip the metadata flush. A crash may lose the last commit but never
    /// corrupts the file.
    NosyncSafe,
    /// Leave flushing to the OS. A crash may corrupt the file.
    NosyncUnsafe,
}

impl SyncStrategy {
    fn flags(self) -> EnvFlags {
        match self {
            SyncStrategy::Always => EnvFlags::empty(),
            SyncStrategy::NosyncSafe => EnvFlags::NO_META_SYNC,
            SyncStrategy::NosyncUnsafe => EnvFlags::NO_SYNC,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LmdbConfig {
    /// Upper bound of the memory map, and so of the file, in bytes.
    #[serde(default = "default_map_size")]
    pub map_size: usize,
    #[serde(default)]
    pub sync: SyncStrategy,
}

fn default_map_size() -> usize {
    256 * 1024 * 1024 * 1024
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            map_size: default_map_size(),
            sync: SyncStrategy::default(),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) env: Env,
    dbs: Vec<Database<Bytes, Bytes>>,
    pub(crate) writer: WriterGate,
}

impl Shared {
    pub(crate) fn db(&self, table: Table) -> Database<Bytes, Bytes> {
        self.dbs[table.index()]
    }
}

/// An LMDB environment with one database per table.
pub struct LmdbEngine {
    shared: Arc<Shared>,
}

impl LmdbEngine {
    /// Open or create the environment file at `path`.
    pub fn open(path: impl AsRef<Path>, config: &LmdbConfig) -> Result<Self, LmdbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = EnvOpenOptions::new();
        options.map_size(config.map_size).max_dbs(Table::COUNT as u32);
        // SAFETY: the node opens each environment file once per process.
        let env = unsafe {
            options.flags(EnvFlags::NO_SUB_DIR | config.sync.flags());
            options.open(path)
        }
        .map_err(LmdbError::from)?;

        let mut wtxn = env.write_txn().map_err(LmdbError::from)?;
        let dbs = Table::ALL
            .iter()
            .map(|table| env.create_database::<Bytes, Bytes>(&mut wtxn, Some(table.as_str())))
            .collect::<Result<Vec<_>, _>>()
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;

        info!(path = %path.display(), sync = ?config.sync, "LMDB environment opened");
        Ok(Self {
            shared: Arc::new(Shared {
                env,
                dbs,
                writer: WriterGate::new(),
            }),
        })
    }
}

impl KvEngine for LmdbEngine {
    fn begin_read(&self) -> Box<dyn KvRead + Send> {
        Box::new(LmdbRead::begin(&self.shared))
    }

    fn begin_write(&self) -> Box<dyn KvWrite + Send> {
        self.shared.writer.acquire();
        Box::new(LmdbWrite {
            base: LmdbRead::begin(&self.shared),
            shared: Arc::clone(&self.shared),
            overlay: WriteOverlay::new(),
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.shared.env.force_sync().map_err(LmdbError::from)?;
        Ok(())
    }
}
