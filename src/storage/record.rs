//! Record headers encoded in file names.
//!
//! Each header is a fixed number of `-` separated decimal fields. Parsing
//! fails closed: anything that is not exactly the expected shape yields
//! `None` and the walker skips the file.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::QoS;

/// Wall-clock creation time used to disambiguate file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp {
    pub secs: u64,
    pub micros: u32,
}

impl Stamp {
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: elapsed.as_secs(),
            micros: elapsed.subsec_micros(),
        }
    }

    /// Next distinct stamp, used when a name is already taken
    pub(crate) fn bump(self) -> Self {
        if self.micros >= 999_999 {
            Self {
                secs: self.secs + 1,
                micros: 0,
            }
        } else {
            Self {
                secs: self.secs,
                micros: self.micros + 1,
            }
        }
    }
}

/// `<topiclen>-<qos>-<bucket>-<sec>-<usec>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHeader {
    /// Byte length of the stored topic filter
    pub filter_len: usize,
    pub qos: QoS,
    pub bucket: u32,
    pub stamp: Stamp,
}

impl SubscriptionHeader {
    pub fn new(filter_len: usize, qos: QoS, bucket: u32) -> Self {
        Self {
            filter_len,
            qos,
            bucket,
            stamp: Stamp::now(),
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn parse(name: &str) -> Option<Self> {
        let [len, qos, bucket, secs, micros] = split_fields::<5>(name)?;
        Some(Self {
            filter_len: len.parse().ok()?,
            qos: parse_qos(qos)?,
            bucket: bucket.parse().ok()?,
            stamp: parse_stamp(secs, micros)?,
        })
    }
}

impl fmt::Display for SubscriptionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.filter_len, self.qos, self.bucket, self.stamp.secs, self.stamp.micros
        )
    }
}

/// `<packet_id>-<size>-<qos>-<sec>-<usec>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Packet identifier; values above 65535 tag QoS 0 messages
    pub packet_id: u32,
    /// Payload size in bytes
    pub size: usize,
    pub qos: QoS,
    pub stamp: Stamp,
}

impl MessageHeader {
    pub fn new(packet_id: u32, size: usize, qos: QoS) -> Self {
        Self {
            packet_id,
            size,
            qos,
            stamp: Stamp::now(),
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn parse(name: &str) -> Option<Self> {
        let [packet_id, size, qos, secs, micros] = split_fields::<5>(name)?;
        Some(Self {
            packet_id: packet_id.parse().ok()?,
            size: size.parse().ok()?,
            qos: parse_qos(qos)?,
            stamp: parse_stamp(secs, micros)?,
        })
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.packet_id, self.size, self.qos, self.stamp.secs, self.stamp.micros
        )
    }
}

/// Split into exactly `N` non-empty all-digit fields.
fn split_fields<const N: usize>(name: &str) -> Option<[&str; N]> {
    let mut fields = [""; N];
    let mut parts = name.split('-');
    for field in fields.iter_mut() {
        let part = parts.next()?;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *field = part;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(fields)
}

fn parse_qos(field: &str) -> Option<QoS> {
    QoS::from_u8(field.parse().ok()?)
}

fn parse_stamp(secs: &str, micros: &str) -> Option<Stamp> {
    let micros: u32 = micros.parse().ok()?;
    if micros > 999_999 {
        return None;
    }
    Some(Stamp {
        secs: secs.parse().ok()?,
        micros,
    })
}
