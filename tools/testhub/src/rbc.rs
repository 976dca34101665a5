//! VAL / ECHO / READY broadcast emulation.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Protocol message. Encoded as `{"type": 0|1|2, "from": n, "val": m}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum RbcMessage {
    /// `from` proposes its value.
    Val { from: u32 },
    /// `from` has seen the VAL of `val`.
    Echo { from: u32, val: u32 },
    /// `from` has seen every echo.
    Ready { from: u32 },
}

impl RbcMessage {
    fn sender(&self) -> u32 {
        match *self {
            Self::Val { from } | Self::Echo { from, .. } | Self::Ready { from } => from,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u32,
    from: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    val: Option<u32>,
}

impl TryFrom<WireMessage> for RbcMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        match (wire.kind, wire.val) {
            (0, _) => Ok(Self::Val { from: wire.from }),
            (1, Some(val)) => Ok(Self::Echo { from: wire.from, val }),
            (1, None) => Err("echo without val".into()),
            (2, _) => Ok(Self::Ready { from: wire.from }),
            (kind, _) => Err(format!("unknown message type {kind}")),
        }
    }
}

impl From<RbcMessage> for WireMessage {
    fn from(msg: RbcMessage) -> Self {
        match msg {
            RbcMessage::Val { from } => Self { kind: 0, from, val: None },
            RbcMessage::Echo { from, val } => Self { kind: 1, from, val: Some(val) },
            RbcMessage::Ready { from } => Self { kind: 2, from, val: None },
        }
    }
}

/// Protocol state of one participant.
#[derive(Debug)]
pub struct RbcEmulation {
    idx: u32,
    vals: Vec<bool>,
    /// `echos[from][val]`
    echos: Vec<Vec<bool>>,
    readys: Vec<bool>,
    ready_sent: bool,
}

impl RbcEmulation {
    pub fn new(idx: u32, participants: u32) -> Self {
        let n = participants as usize;
        Self {
            idx,
            vals: vec![false; n],
            echos: vec![vec![false; n]; n],
            readys: vec![false; n],
            ready_sent: false,
        }
    }

    /// Our VAL.
    pub fn val(&self) -> RbcMessage {
        RbcMessage::Val { from: self.idx }
    }

    /// Apply `msg`; returns the message it makes us broadcast, if any.
    pub fn process(&mut self, msg: RbcMessage) -> Option<RbcMessage> {
        let n = self.readys.len();
        let in_range = |i: u32| (i as usize) < n;
        if !in_range(msg.sender()) {
            warn!(?msg, participants = n, "Sender index out of range");
            return None;
        }

        match msg {
            RbcMessage::Val { from } => {
                self.vals[from as usize] = true;
                debug!(idx = self.idx, from, "Echoing VAL");
                Some(RbcMessage::Echo { from: self.idx, val: from })
            }
            RbcMessage::Echo { from, val } => {
                if !in_range(val) {
                    warn!(?msg, "Echoed index out of range");
                    return None;
                }
                self.echos[from as usize][val as usize] = true;
                let complete = self.echos.iter().flatten().all(|seen| *seen);
                if complete && !self.ready_sent {
                    self.ready_sent = true;
                    info!(idx = self.idx, "All echoes seen, sending READY");
                    return Some(RbcMessage::Ready { from: self.idx });
                }
                None
            }
            RbcMessage::Ready { from } => {
                self.readys[from as usize] = true;
                None
            }
        }
    }

    /// Whether READY has been seen from every participant.
    pub fn is_ready(&self) -> bool {
        self.readys.iter().all(|r| *r)
    }
}

/// Sends a payload to every other participant.
pub trait Broadcast {
    fn broadcast(&mut self, payload: &[u8]);
}

/// Protocol state plus the network it talks over.
///
/// Broadcasts are also applied locally, since the network does not deliver
/// them back to the sender.
pub struct Participant<N> {
    rbc: RbcEmulation,
    network: N,
}

impl<N: Broadcast> Participant<N> {
    pub fn new(rbc: RbcEmulation, network: N) -> Self {
        Self { rbc, network }
    }

    /// Broadcast our VAL.
    pub fn start(&mut self) -> serde_json::Result<()> {
        let val = self.rbc.val();
        self.send_and_apply(val)
    }

    /// Apply one payload received from the network.
    pub fn deliver(&mut self, payload: &[u8]) -> serde_json::Result<()> {
        let msg: RbcMessage = serde_json::from_slice(payload)?;
        self.apply(msg)
    }

    pub fn is_ready(&self) -> bool {
        self.rbc.is_ready()
    }

    fn send_and_apply(&mut self, msg: RbcMessage) -> serde_json::Result<()> {
        self.network.broadcast(&serde_json::to_vec(&msg)?);
        self.apply(msg)
    }

    fn apply(&mut self, first: RbcMessage) -> serde_json::Result<()> {
        let mut queue = VecDeque::from([first]);
        while let Some(msg) = queue.pop_front() {
            if let Some(reply) = self.rbc.process(msg) {
                self.network.broadcast(&serde_json::to_vec(&reply)?);
                queue.push_back(reply);
            }
        }
        Ok(())
    }
}
