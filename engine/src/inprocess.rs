//! In-process clients are invoked directly by the cycle thread rather than
//! signalled through a subgraph FIFO. This is the synchronous callback
//! table the executor walks them through.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::client::ClientId;

/// A loaded in-process client's processing callback. Returns `false` on a
/// process error (counted the same way an external client's error would
/// be).
pub trait InProcessClient: Send {
    fn process(&mut self, nframes: u32) -> bool;
}

#[derive(Default)]
pub struct InProcessTable {
    clients: Mutex<HashMap<ClientId, Box<dyn InProcessClient>>>,
}

impl InProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, id: ClientId, client: Box<dyn InProcessClient>) {
        self.clients.lock().insert(id, client);
    }

    pub fn remove(&self, id: ClientId) {
        self.clients.lock().remove(&id);
    }

    pub fn process(&self, id: ClientId, nframes: u32) -> bool {
        match self.clients.lock().get_mut(&id) {
            Some(c) => c.process(nframes),
            None => true,
        }
    }
}
