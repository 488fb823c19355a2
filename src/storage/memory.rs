//! In-memory removable card
//!
//! Behaves like a card in a slot: it can be ejected and re-inserted while a
//! session holds it, and its contents survive the round trip. Clones are
//! handles to the same card, so a test can keep one handle and give the other
//! to a `StorageSession`.

use super::device::{parent_of, CardType, DeviceError, DirEntry, StorageDevice, WriteMode};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default capacity: 64 MiB
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug)]
struct CardState {
    inserted: bool,
    started: bool,
    capacity: u64,
    nodes: BTreeMap<String, Node>,
    /// `begin` calls seen, successful or not
    begin_attempts: u32,
    fail_next_begin: bool,
}

impl CardState {
    fn used(&self) -> u64 {
        self.nodes
            .values()
            .map(|n| match n {
                Node::File(data) => data.len() as u64,
                Node::Dir => 0,
            })
            .sum()
    }

    fn ready(&self) -> Result<(), DeviceError> {
        if !self.inserted {
            Err(DeviceError::NoCard)
        } else if !self.started {
            Err(DeviceError::NotStarted)
        } else {
            Ok(())
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || matches!(self.nodes.get(path), Some(Node::Dir))
    }

    fn file(&self, path: &str) -> Result<&[u8], DeviceError> {
        self.ready()?;
        match self.nodes.get(path) {
            Some(Node::File(data)) => Ok(data),
            Some(Node::Dir) => Err(DeviceError::IsADirectory(path.to_string())),
            None if path == "/" => Err(DeviceError::IsADirectory(path.to_string())),
            None => Err(DeviceError::NotFound(path.to_string())),
        }
    }

    fn children(&self, dir: &str) -> Vec<(String, &Node)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, n)| (k[prefix.len()..].to_string(), n))
            .collect()
    }

    fn has_children(&self, dir: &str) -> bool {
        !self.children(dir).is_empty()
    }
}

/// A simulated SD card held in memory
#[derive(Debug, Clone)]
pub struct MemoryCard {
    state: Arc<Mutex<CardState>>,
}

impl MemoryCard {
    /// Create an inserted, empty card with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                inserted: true,
                started: false,
                capacity,
                nodes: BTreeMap::new(),
                begin_attempts: 0,
                fail_next_begin: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pull the card out of the slot. The bus drops with it.
    pub fn eject(&self) {
        let mut state = self.lock();
        state.inserted = false;
        state.started = false;
    }

    /// Push the card back in. It still needs `begin` before use.
    pub fn insert(&self) {
        self.lock().inserted = true;
    }

    /// Make the next `begin` fail even with a card present
    pub fn fail_next_begin(&self) {
        self.lock().fail_next_begin = true;
    }

    /// Number of `begin` calls so far
    pub fn begin_attempts(&self) -> u32 {
        self.lock().begin_attempts
    }

    pub fn is_inserted(&self) -> bool {
        self.lock().inserted
    }

    /// Whether the bus is currently up
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Place a file directly on the card, creating parent directories.
    ///
    /// Works regardless of slot state; used to prepare fixtures.
    pub fn put_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let mut dir = parent_of(path).to_string();
        let mut parents = Vec::new();
        while dir != "/" {
            parents.push(dir.clone());
            dir = parent_of(&dir).to_string();
        }
        for p in parents {
            state.nodes.entry(p).or_insert(Node::Dir);
        }
        state.nodes.insert(path.to_string(), Node::File(data.into()));
    }

    /// Read a file directly from the card, bypassing slot state
    pub fn get_file(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(path) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }
}

impl Default for MemoryCard {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageDevice for MemoryCard {
    fn begin(&mut self, _mount_point: &str, _one_bit_mode: bool) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.begin_attempts += 1;
        if !state.inserted {
            return Err(DeviceError::NoCard);
        }
        if std::mem::take(&mut state.fail_next_begin) {
            return Err(DeviceError::Io(io::Error::other("card did not respond to init")));
        }
        state.started = true;
        Ok(())
    }

    fn end(&mut self) {
        self.lock().started = false;
    }

    fn detect_card(&mut self) -> bool {
        self.lock().inserted
    }

    fn card_type(&self) -> CardType {
        let state = self.lock();
        if state.inserted && state.started {
            CardType::Sdhc
        } else {
            CardType::None
        }
    }

    fn total_bytes(&self) -> u64 {
        self.lock().capacity
    }

    fn used_bytes(&self) -> u64 {
        self.lock().used()
    }

    fn exists(&self, path: &str) -> bool {
        let state = self.lock();
        state.ready().is_ok() && (path == "/" || state.nodes.contains_key(path))
    }

    fn is_dir(&self, path: &str) -> bool {
        let state = self.lock();
        state.ready().is_ok() && state.is_dir(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, DeviceError> {
        self.lock().file(path).map(<[u8]>::to_vec)
    }

    fn file_len(&self, path: &str) -> Result<u64, DeviceError> {
        self.lock().file(path).map(|data| data.len() as u64)
    }

    fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let state = self.lock();
        let data = state.file(path)?;
        let start = usize::try_from(offset).map_or(data.len(), |o| o.min(data.len()));
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&mut self, path: &str, data: &[u8], mode: WriteMode) -> Result<usize, DeviceError> {
        let mut state = self.lock();
        state.ready()?;
        if !state.is_dir(parent_of(path)) {
            return Err(DeviceError::NotFound(parent_of(path).to_string()));
        }
        if state.is_dir(path) {
            return Err(DeviceError::IsADirectory(path.to_string()));
        }
        let existing = match state.nodes.get(path) {
            Some(Node::File(d)) => d.len() as u64,
            _ => 0,
        };
        let replaced = if mode == WriteMode::Truncate { existing } else { 0 };
        if state.used() - replaced + data.len() as u64 > state.capacity {
            return Err(DeviceError::Full);
        }
        let entry = state
            .nodes
            .entry(path.to_string())
            .or_insert_with(|| Node::File(Vec::new()));
        if let Node::File(content) = entry {
            if mode == WriteMode::Truncate {
                content.clear();
            }
            content.extend_from_slice(data);
        }
        Ok(data.len())
    }

    fn remove(&mut self, path: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.ready()?;
        match state.nodes.get(path) {
            Some(Node::File(_)) => {}
            Some(Node::Dir) => return Err(DeviceError::IsADirectory(path.to_string())),
            None => return Err(DeviceError::NotFound(path.to_string())),
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.ready()?;
        if !state.nodes.contains_key(from) {
            return Err(DeviceError::NotFound(from.to_string()));
        }
        if state.nodes.contains_key(to) {
            return Err(DeviceError::AlreadyExists(to.to_string()));
        }
        if !state.is_dir(parent_of(to)) {
            return Err(DeviceError::NotFound(parent_of(to).to_string()));
        }
        // Move the node and, for directories, everything below it
        let prefix = format!("{}/", from);
        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|k| k.as_str() == from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = state.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                state.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.ready()?;
        if path == "/" || state.nodes.contains_key(path) {
            return Err(DeviceError::AlreadyExists(path.to_string()));
        }
        if !state.is_dir(parent_of(path)) {
            return Err(DeviceError::NotFound(parent_of(path).to_string()));
        }
        state.nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<(), DeviceError> {
        let mut state = self.lock();
        state.ready()?;
        match state.nodes.get(path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(DeviceError::NotADirectory(path.to_string())),
            None => return Err(DeviceError::NotFound(path.to_string())),
        }
        if state.has_children(path) {
            return Err(DeviceError::DirectoryNotEmpty(path.to_string()));
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>, DeviceError> {
        let state = self.lock();
        state.ready()?;
        if !state.is_dir(path) {
            return if state.nodes.contains_key(path) {
                Err(DeviceError::NotADirectory(path.to_string()))
            } else {
                Err(DeviceError::NotFound(path.to_string()))
            };
        }
        Ok(state
            .children(path)
            .into_iter()
            .map(|(name, node)| match node {
                Node::File(data) => DirEntry {
                    name,
                    is_dir: false,
                    size: data.len() as u64,
                },
                Node::Dir => DirEntry {
                    name,
                    is_dir: true,
                    size: 0,
                },
            })
            .collect())
    }
}
