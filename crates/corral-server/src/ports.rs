//! Free-port allocation shared across orchestrator processes.
//!
//! Finding a port that binds is not enough when several orchestrators
//! run side by side: two of them can probe the same port before either
//! server has started listening on it. The [`PortRegistry`] closes that
//! window with a small JSON file mapping port → owning pid, rewritten
//! under an exclusive advisory lock on every allocation. Entries whose
//! owner has exited are pruned on each access.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::TcpListener;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::process;

/// Ports handed out by [`PortAllocator::allocate`].
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 10000..=20000;

/// Candidate ports tried before giving up.
pub const DEFAULT_ALLOCATION_ATTEMPTS: u32 = 10_000;

const REGISTRY_FILE_NAME: &str = "corral_portfile.lock";

type Entries = BTreeMap<String, u32>;

/// File-backed port → pid map guarded by an exclusive `flock`.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    path: PathBuf,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(REGISTRY_FILE_NAME))
    }
}

impl PortRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claims `port` for the current process.
    ///
    /// Returns `false` if a live process already owns it.
    pub fn try_allocate(&self, port: u16) -> io::Result<bool> {
        self.try_allocate_for(port, std::process::id())
    }

    fn try_allocate_for(&self, port: u16, owner: u32) -> io::Result<bool> {
        let mut locked = LockedRegistry::open(&self.path)?;
        let mut entries = locked.read_entries();
        entries.retain(|_, pid| process::is_pid_alive(*pid));

        let key = port.to_string();
        let allocated = !entries.contains_key(&key);
        if allocated {
            entries.insert(key, owner);
        }

        locked.write_entries(&entries)?;
        Ok(allocated)
    }

    /// Returns the live entries, pruning stale ones as a side effect.
    pub fn entries(&self) -> io::Result<BTreeMap<u16, u32>> {
        let mut locked = LockedRegistry::open(&self.path)?;
        let mut entries = locked.read_entries();
        entries.retain(|_, pid| process::is_pid_alive(*pid));
        locked.write_entries(&entries)?;

        Ok(entries
            .into_iter()
            .filter_map(|(port, pid)| Some((port.parse().ok()?, pid)))
            .collect())
    }
}

/// The registry file, held under an exclusive lock for as long as
/// this value lives.
struct LockedRegistry {
    file: File,
}

impl LockedRegistry {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    fn read_entries(&mut self) -> Entries {
        let mut raw = String::new();
        let read = self
            .file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut raw));
        if let Err(e) = read {
            warn!("port registry unreadable, starting empty: {e}");
            return Entries::new();
        }
        if raw.trim().is_empty() {
            return Entries::new();
        }
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("port registry is corrupt, starting empty: {e}");
            Entries::new()
        })
    }

    fn write_entries(&mut self, entries: &Entries) -> io::Result<()> {
        let data = serde_json::to_vec(entries)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;
        self.file.flush()
    }
}

impl Drop for LockedRegistry {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Hands out free TCP ports that no other orchestrator has claimed.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    registry: PortRegistry,
    range: RangeInclusive<u16>,
    attempts: u32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PortRegistry::default())
    }
}

impl PortAllocator {
    pub fn new(registry: PortRegistry) -> Self {
        Self {
            registry,
            range: DEFAULT_PORT_RANGE,
            attempts: DEFAULT_ALLOCATION_ATTEMPTS,
        }
    }

    pub fn with_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.range = range;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Picks a random port that binds right now and records it in the
    /// registry.
    pub fn allocate(&self) -> Result<u16, ServerError> {
        let mut rng = rand::thread_rng();

        for _ in 0..self.attempts {
            let port = rng.gen_range(self.range.clone());

            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(listener) => drop(listener),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable
                    ) =>
                {
                    continue
                }
                Err(source) => return Err(ServerError::PortProbe { port, source }),
            }

            let claimed =
                self.registry
                    .try_allocate(port)
                    .map_err(|source| ServerError::PortRegistry {
                        path: self.registry.path.clone(),
                        source,
                    })?;
            if claimed {
                debug!(port, "allocated port");
                return Ok(port);
            }
        }

        Err(ServerError::PortAllocationExhausted(self.attempts))
    }
}
