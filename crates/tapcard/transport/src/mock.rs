//! Scripted physical link for tests

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::LinkError;
use crate::link::PhysicalLink;

/// One scripted reaction to a transceive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    /// Answer with these bytes
    Respond(Bytes),
    /// Fail the exchange and drop the connection
    Fail,
}

impl MockStep {
    /// Create a response step from a byte slice
    pub fn respond(bytes: &[u8]) -> Self {
        Self::Respond(Bytes::copy_from_slice(bytes))
    }
}

#[derive(Debug, Default)]
struct MockLinkState {
    script: VecDeque<MockStep>,
    commands: Vec<Bytes>,
    connected: bool,
    refuse_connect: bool,
    stall_connect: bool,
    connects: usize,
    closes: usize,
}

/// Mock link replaying a script of responses
///
/// Clones share state, so a test can keep a handle after moving the link
/// into a transport.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLink {
    /// Create a new disconnected mock link with the given script
    pub fn new(script: Vec<MockStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockLinkState {
                script: script.into(),
                ..Default::default()
            })),
        }
    }

    /// Make every connect attempt fail
    pub fn refusing_connect(self) -> Self {
        self.state.lock().refuse_connect = true;
        self
    }

    /// Make every connect attempt wait forever
    pub fn stalling_connect(self) -> Self {
        self.state.lock().stall_connect = true;
        self
    }

    /// Force the connection flag, simulating a tag that went out of range
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<Bytes> {
        self.state.lock().commands.clone()
    }

    /// Number of connect calls
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of close calls
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }
}

#[async_trait]
impl PhysicalLink for MockLink {
    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let stall = {
            let mut state = self.state.lock();
            state.connects += 1;
            if state.refuse_connect {
                return Err(LinkError::new("connect refused"));
            }
            state.stall_connect
        };
        if stall {
            std::future::pending::<()>().await;
        }

        self.state.lock().connected = true;
        Ok(())
    }

    async fn transceive(&mut self, command: &[u8]) -> Result<Bytes, LinkError> {
        let mut state = self.state.lock();
        state.commands.push(Bytes::copy_from_slice(command));

        match state.script.pop_front() {
            Some(MockStep::Respond(response)) => Ok(response),
            Some(MockStep::Fail) => {
                state.connected = false;
                Err(LinkError::new("tag connection lost"))
            }
            None => Err(LinkError::new("no scripted response")),
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.connected = false;
    }
}
