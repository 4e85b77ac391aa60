//! Free-port allocation.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use rand::Rng;

use crate::{Error, Result};

const MAX_TRIES: usize = 20;

/// Hands out ports for new instances.
///
/// An allocator must never return the same port twice.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self, max_port: u16) -> Result<u16>;
}

/// Picks random ports in `min_port..max_port` and test-binds them.
#[derive(Debug)]
pub struct LocalPortAllocator {
    min_port: u16,
    used: Mutex<HashSet<u16>>,
}

impl LocalPortAllocator {
    pub fn new(min_port: u16) -> Self {
        Self {
            min_port,
            used: Mutex::new(HashSet::new()),
        }
    }
}

impl PortAllocator for LocalPortAllocator {
    fn allocate(&self, max_port: u16) -> Result<u16> {
        if max_port <= self.min_port {
            return Err(Error::Config(format!(
                "max_port {max_port} must be above min_port {}",
                self.min_port
            )));
        }

        let mut used = self
            .used
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_TRIES {
            let port = rng.gen_range(self.min_port..max_port);
            if used.contains(&port) {
                continue;
            }
            if TcpListener::bind(("0.0.0.0", port)).is_ok() {
                used.insert(port);
                return Ok(port);
            }
        }

        Err(Error::PortExhausted {
            min: self.min_port,
            max: max_port,
            tries: MAX_TRIES,
        })
    }
}
