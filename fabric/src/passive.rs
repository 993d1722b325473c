//! Passive two-sided channel.
//!
//! Every rank owns a single MPSC inbox shared by all senders. A send is
//! synchronous: it returns once the receiver has copied the message out, or
//! rejected it.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};

use parking_lot::Mutex;

use crate::Rank;
use crate::error::{Error, Result};

/// Receiver's verdict on a passive message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Delivered,
    TooLarge { max: usize },
}

/// A message tagged with the sender's rank.
struct PassiveMessage {
    from: Rank,
    data: Vec<u8>,
    ack: SyncSender<Ack>,
}

/// One rank's end of the passive channel.
pub(crate) struct PassiveChannel {
    rank: Rank,
    rx: Mutex<Receiver<PassiveMessage>>,
    txs: Vec<Option<Sender<PassiveMessage>>>,
}

impl PassiveChannel {
    /// Send `data` to `to` and block until it has been received.
    pub(crate) fn send(&self, to: Rank, data: &[u8]) -> Result<()> {
        let tx = self
            .txs
            .get(usize::from(to))
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank(to))?;
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        tx.send(PassiveMessage {
            from: self.rank,
            data: data.to_vec(),
            ack: ack_tx,
        })
        .map_err(|_| Error::Disconnected)?;
        match ack_rx.recv().map_err(|_| Error::Disconnected)? {
            Ack::Delivered => Ok(()),
            Ack::TooLarge { max } => Err(Error::MessageTooLarge {
                size: data.len(),
                max,
            }),
        }
    }

    /// Block until a message arrives and copy it into `buf`.
    ///
    /// Returns the sender and the message length.
    pub(crate) fn receive(&self, buf: &mut [u8]) -> Result<(Rank, usize)> {
        let msg = self.rx.lock().recv().map_err(|_| Error::Disconnected)?;
        if msg.data.len() > buf.len() {
            let _ = msg.ack.send(Ack::TooLarge { max: buf.len() });
            return Err(Error::MessageTooLarge {
                size: msg.data.len(),
                max: buf.len(),
            });
        }
        buf[..msg.data.len()].copy_from_slice(&msg.data);
        let _ = msg.ack.send(Ack::Delivered);
        Ok((msg.from, msg.data.len()))
    }
}

/// Build the passive channels of an `n`-rank world.
///
/// Sending to oneself is not possible: a synchronous self-send would never
/// be received.
pub(crate) fn create_channels(n: usize) -> Vec<PassiveChannel> {
    let mut receivers = Vec::with_capacity(n);
    let mut all_senders: Vec<Vec<Option<Sender<PassiveMessage>>>> =
        (0..n).map(|_| (0..n).map(|_| None).collect()).collect();

    for i in 0..n {
        let (tx, rx) = mpsc::channel();
        receivers.push(rx);
        for (j, senders) in all_senders.iter_mut().enumerate() {
            if i != j {
                senders[i] = Some(tx.clone());
            }
        }
    }

    receivers
        .into_iter()
        .zip(all_senders)
        .enumerate()
        .map(|(rank, (rx, txs))| PassiveChannel {
            rank: rank as Rank,
            rx: Mutex::new(rx),
            txs,
        })
        .collect()
}
