//! Shared-memory transport implementation.
//!
//! A file-backed shared mapping is divided into fixed-size blocks. Exactly
//! two peers exchange messages by handing block descriptors around: a sender
//! takes a free block, writes into the mapping, and pushes the descriptor
//! onto the destination peer's receive channel; the receiver copies the
//! block out and puts the descriptor back on the free list. Every block
//! index lives in exactly one channel at any time, which is the entire
//! exclusion discipline for the mapping.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{mpsc, Arc, Mutex};

use ::config::Config;
use tracing::{debug, info, trace};

use crate::config::{lookup_int, lookup_string};
use crate::error::Error;

const DEFAULT_BLOCK_SIZE: usize = 4096;
const DEFAULT_NUM_BLOCKS: usize = 512;

/// Descriptor of one block of the shared mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmBlock {
    /// Block number; the block's bytes start at `index * block_size`.
    pub index: u64,
}

/// Configuration of a shared-memory transport.
#[derive(Debug, Clone)]
pub struct SmTransportCfg {
    /// Identifier of the first peer.
    pub peer1: String,
    /// Identifier of the second peer.
    pub peer2: String,
    /// Bytes per block; one block carries one message.
    pub block_size: usize,
    /// Number of blocks in the mapping.
    pub num_blocks: usize,
}

impl Default for SmTransportCfg {
    fn default() -> Self {
        Self {
            peer1: String::new(),
            peer2: String::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            num_blocks: DEFAULT_NUM_BLOCKS,
        }
    }
}

impl SmTransportCfg {
    /// Builds a configuration from namespaced `config` keys.
    ///
    /// Recognized keys: `peer1`, `peer2`, `block_size`, `num_blocks`.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let mut cfg = Self::default();
        if let Ok(peer1) = lookup_string(config, name, "peer1") {
            cfg.peer1 = peer1;
        }
        if let Ok(peer2) = lookup_string(config, name, "peer2") {
            cfg.peer2 = peer2;
        }
        if let Ok(block_size) = lookup_int(config, name, "block_size") {
            cfg.block_size = block_size as usize;
        }
        if let Ok(num_blocks) = lookup_int(config, name, "num_blocks") {
            cfg.num_blocks = num_blocks as usize;
        }
        Ok(cfg)
    }

    /// Creates the transport: maps the backing file and preloads the free
    /// list with every block index.
    pub fn init(self) -> Result<Arc<SmTransport>, Error> {
        if self.peer1.is_empty() || self.peer2.is_empty() {
            return Err(Error::InvalidConfig("both peer ids must be set".into()));
        }
        if self.peer1 == self.peer2 {
            return Err(Error::InvalidConfig("peer ids must differ".into()));
        }
        let cfg = SmTransportCfg {
            block_size: if self.block_size == 0 {
                DEFAULT_BLOCK_SIZE
            } else {
                self.block_size
            },
            num_blocks: if self.num_blocks == 0 {
                DEFAULT_NUM_BLOCKS
            } else {
                self.num_blocks
            },
            ..self
        };

        let region = MmapRegion::create(cfg.block_size * cfg.num_blocks)?;
        info!(
            blocks = cfg.num_blocks,
            block_size = cfg.block_size,
            path = %region.path.display(),
            "shared-memory segment mapped"
        );

        let (free_tx, free_rx) = mpsc::sync_channel(cfg.num_blocks);
        for index in 0..cfg.num_blocks as u64 {
            free_tx
                .send(SmBlock { index })
                .expect("preloading an empty free channel cannot fail");
        }

        let peers = [
            SmPeer::new(cfg.peer1.clone(), cfg.num_blocks),
            SmPeer::new(cfg.peer2.clone(), cfg.num_blocks),
        ];

        Ok(Arc::new(SmTransport {
            free_count: AtomicUsize::new(cfg.num_blocks),
            region: Mutex::new(Some(region)),
            free_tx,
            free_rx: Mutex::new(free_rx),
            peers,
            cfg,
        }))
    }
}

#[derive(Debug)]
struct SmPeer {
    id: String,
    queue_tx: SyncSender<SmBlock>,
    queue_rx: Mutex<Receiver<SmBlock>>,
}

impl SmPeer {
    fn new(id: String, depth: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::sync_channel(depth);
        Self {
            id,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
        }
    }
}

/// An intra-node transport over a shared memory mapping, between exactly
/// two peers.
#[derive(Debug)]
pub struct SmTransport {
    cfg: SmTransportCfg,
    region: Mutex<Option<MmapRegion>>,
    free_tx: SyncSender<SmBlock>,
    free_rx: Mutex<Receiver<SmBlock>>,
    free_count: AtomicUsize,
    peers: [SmPeer; 2],
}

impl SmTransport {
    /// Writes `data` into a free block and queues it for peer `dst`.
    ///
    /// Data longer than one block is clipped to `block_size`. Blocks when
    /// no block is free. A `dst` matching neither peer fails with
    /// [`Error::UnknownPeer`] before any block is taken.
    pub fn send(&self, dst: &str, data: &[u8]) -> Result<(), Error> {
        let peer = self.peer(dst).ok_or_else(|| Error::UnknownPeer(dst.to_string()))?;

        let block = self
            .free_rx
            .lock()
            .expect("free channel lock poisoned")
            .recv()
            .map_err(|_| Error::InvalidState)?;
        self.free_count.fetch_sub(1, Ordering::Relaxed);

        trace!(index = block.index, len = data.len(), "writing block");
        {
            let guard = self.region.lock().expect("region lock poisoned");
            let Some(region) = guard.as_ref() else {
                self.put_free(block);
                return Err(Error::InvalidState);
            };
            region.write_block(block.index, self.cfg.block_size, data);
        }

        trace!(index = block.index, peer = %peer.id, "queuing block for peer");
        peer.queue_tx
            .send(block)
            .map_err(|_| Error::InvalidState)?;
        Ok(())
    }

    /// Takes the next block queued for peer `src`, copies it out, and
    /// returns the block to the free list.
    ///
    /// Always yields exactly `block_size` bytes. Blocks until a message is
    /// queued for the peer.
    pub fn recv(&self, src: &str) -> Result<Vec<u8>, Error> {
        let peer = self.peer(src).ok_or_else(|| Error::UnknownPeer(src.to_string()))?;

        let block = peer
            .queue_rx
            .lock()
            .expect("peer queue lock poisoned")
            .recv()
            .map_err(|_| Error::InvalidState)?;

        trace!(index = block.index, peer = %peer.id, "reading block");
        let data = {
            let guard = self.region.lock().expect("region lock poisoned");
            let Some(region) = guard.as_ref() else {
                self.put_free(block);
                return Err(Error::InvalidState);
            };
            region.read_block(block.index, self.cfg.block_size)
        };

        self.put_free(block);
        Ok(data)
    }

    /// Unmaps the region and removes the backing file. Further sends and
    /// receives fail with [`Error::InvalidState`].
    pub fn fini(&self) -> Result<(), Error> {
        let region = self.region.lock().expect("region lock poisoned").take();
        match region {
            Some(region) => {
                debug!(path = %region.path.display(), "tearing down shared-memory segment");
                drop(region);
                Ok(())
            }
            None => Err(Error::InvalidState),
        }
    }

    /// Number of blocks currently on the free list.
    pub fn available_blocks(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    /// The two configured peer ids.
    pub fn peer_ids(&self) -> (&str, &str) {
        (&self.peers[0].id, &self.peers[1].id)
    }

    /// Path of the backing file, while the mapping is alive.
    pub fn region_path(&self) -> Option<PathBuf> {
        self.region
            .lock()
            .expect("region lock poisoned")
            .as_ref()
            .map(|region| region.path.clone())
    }

    fn peer(&self, id: &str) -> Option<&SmPeer> {
        self.peers.iter().find(|peer| peer.id == id)
    }

    // The free channel's capacity equals the block count, so a block that
    // came out of the allocator always fits back in.
    fn put_free(&self, block: SmBlock) {
        self.free_tx
            .send(block)
            .expect("free channel closed with blocks outstanding");
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Memory-Mapped Region
// ============================================================================

// File-backed shared mapping. Both peers are threads of one process and
// share this mapping directly; the backing file exists so the mapping is
// `MAP_SHARED` and is removed on drop.
#[derive(Debug)]
struct MmapRegion {
    ptr: *mut u8,
    len: usize,
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl MmapRegion {
    fn create(len: usize) -> Result<Self, Error> {
        let tmp = tempfile::Builder::new()
            .prefix("commkit-sm-")
            .tempfile()
            .map_err(Error::Io)?;
        tmp.as_file().set_len(len as u64)?;
        let (file, path) = tmp.keep().map_err(|err| Error::Io(err.error))?;

        // SAFETY: mapping a fresh file we own, at the length we just set.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                std::os::unix::io::AsRawFd::as_raw_fd(&file),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            let _ = std::fs::remove_file(&path);
            return Err(err.into());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            file,
            path,
        })
    }

    // Copies `data` (clipped to `block_size`) into block `index`. The block
    // discipline guarantees no other thread touches this range.
    fn write_block(&self, index: u64, block_size: usize, data: &[u8]) {
        let offset = index as usize * block_size;
        assert!(offset + block_size <= self.len, "block out of range");
        let n = data.len().min(block_size);
        // SAFETY: the range [offset, offset + n) is inside the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), n);
        }
    }

    fn read_block(&self, index: u64, block_size: usize) -> Vec<u8> {
        let offset = index as usize * block_size;
        assert!(offset + block_size <= self.len, "block out of range");
        let mut data = vec![0u8; block_size];
        // SAFETY: the range [offset, offset + block_size) is inside the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), data.as_mut_ptr(), block_size);
        }
        data
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len are the exact mapping created in `create`.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

// SAFETY: the mapping stays valid for the region's lifetime and the block
// channels guarantee disjoint access to its ranges.
unsafe impl Send for MmapRegion {}
unsafe impl Sync for MmapRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_peer_cfg() -> SmTransportCfg {
        SmTransportCfg {
            peer1: "peer-a".to_string(),
            peer2: "peer-b".to_string(),
            block_size: 64,
            num_blocks: 4,
        }
    }

    #[test]
    fn missing_peer_ids_are_rejected() {
        let cfg = SmTransportCfg::default();
        assert!(matches!(cfg.init(), Err(Error::InvalidConfig(_))));

        let cfg = SmTransportCfg {
            peer1: "same".to_string(),
            peer2: "same".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.init(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn unknown_destination_is_a_routing_error() {
        let transport = two_peer_cfg().init().unwrap();

        assert!(matches!(
            transport.send("nobody", b"hi"),
            Err(Error::UnknownPeer(_))
        ));
        assert!(matches!(
            transport.recv("nobody"),
            Err(Error::UnknownPeer(_))
        ));
        // The failed routing consumed no block.
        assert_eq!(transport.available_blocks(), 4);
        transport.fini().unwrap();
    }

    #[test]
    fn data_longer_than_a_block_is_clipped() {
        let transport = two_peer_cfg().init().unwrap();

        let long = vec![0xabu8; 100];
        transport.send("peer-b", &long).unwrap();
        let got = transport.recv("peer-b").unwrap();
        assert_eq!(got.len(), 64);
        assert!(got.iter().all(|&b| b == 0xab));
        transport.fini().unwrap();
    }

    #[test]
    fn fini_removes_the_backing_file_and_poisons_the_transport() {
        let transport = two_peer_cfg().init().unwrap();
        let path = transport.region_path().unwrap();
        assert!(path.exists());

        transport.fini().unwrap();
        assert!(!path.exists());
        assert!(matches!(transport.fini(), Err(Error::InvalidState)));
        assert!(matches!(
            transport.send("peer-b", b"x"),
            Err(Error::InvalidState)
        ));
    }
}
