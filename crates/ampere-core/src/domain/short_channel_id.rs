// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Short-channel-id codec.
//!
//! A short channel id locates the funding output on chain. It has two forms:
//!
//! | Form | Example | Layout |
//! |------|---------|--------|
//! | textual | `772125x1829x3` | `block x tx x vout` |
//! | packed | `848960415716409347` | `(block << 40) \| (tx << 16) \| vout` |
//!
//! LND reports the packed form, CLN and the graph report the textual one.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Largest block height representable in the packed form (24 bits).
pub const MAX_BLOCK_HEIGHT: u32 = (1 << 24) - 1;
/// Largest transaction index representable in the packed form (24 bits).
pub const MAX_TX_INDEX: u32 = (1 << 24) - 1;

/// Errors from parsing a textual short channel id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortChannelIdError {
    /// The input did not have three `x`-separated parts.
    #[error("malformed short channel id '{0}': expected <block>x<tx>x<vout>")]
    Malformed(String),
    /// A part was not a number or did not fit its bit width.
    #[error("short channel id '{input}' has an out of range {part}")]
    OutOfRange {
        /// The offending input.
        input: String,
        /// Which component overflowed.
        part: &'static str,
    },
}

/// Decoded short channel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortChannelId {
    /// Block height of the funding transaction.
    pub block_height: u32,
    /// Index of the funding transaction inside the block.
    pub tx_index: u32,
    /// Funding output index.
    pub output_index: u16,
}

impl ShortChannelId {
    /// Build a short channel id, rejecting components wider than the packed layout.
    pub fn new(block_height: u32, tx_index: u32, output_index: u16) -> Option<Self> {
        if block_height > MAX_BLOCK_HEIGHT || tx_index > MAX_TX_INDEX {
            return None;
        }
        Some(Self {
            block_height,
            tx_index,
            output_index,
        })
    }

    /// Decode the packed 64-bit form.
    pub fn from_packed(packed: u64) -> Self {
        Self {
            block_height: (packed >> 40) as u32 & MAX_BLOCK_HEIGHT,
            tx_index: (packed >> 16) as u32 & MAX_TX_INDEX,
            output_index: (packed & 0xFFFF) as u16,
        }
    }

    /// Encode into the packed 64-bit form.
    pub fn packed(&self) -> u64 {
        (u64::from(self.block_height) << 40)
            | (u64::from(self.tx_index) << 16)
            | u64::from(self.output_index)
    }
}

impl fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}",
            self.block_height, self.tx_index, self.output_index
        )
    }
}

impl FromStr for ShortChannelId {
    type Err = ShortChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('x').collect();
        let [block, tx, vout] = parts.as_slice() else {
            return Err(ShortChannelIdError::Malformed(s.to_string()));
        };

        let out_of_range = |part| ShortChannelIdError::OutOfRange {
            input: s.to_string(),
            part,
        };

        let block_height: u32 = block.parse().map_err(|_| out_of_range("block height"))?;
        let tx_index: u32 = tx.parse().map_err(|_| out_of_range("tx index"))?;
        let output_index: u16 = vout.parse().map_err(|_| out_of_range("output index"))?;

        if block_height > MAX_BLOCK_HEIGHT {
            return Err(out_of_range("block height"));
        }
        if tx_index > MAX_TX_INDEX {
            return Err(out_of_range("tx index"));
        }

        Ok(Self {
            block_height,
            tx_index,
            output_index,
        })
    }
}

/// Convert the packed LND form into the textual form.
pub fn packed_to_text(packed: u64) -> String {
    ShortChannelId::from_packed(packed).to_string()
}

/// Convert the textual form into the packed LND form.
pub fn text_to_packed(text: &str) -> Result<u64, ShortChannelIdError> {
    text.parse::<ShortChannelId>().map(|scid| scid.packed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_channel_round_trip() {
        let packed = 848_960_415_716_409_347u64;
        assert_eq!(packed_to_text(packed), "772125x1829x3");
        assert_eq!(text_to_packed("772125x1829x3").unwrap(), packed);
    }

    #[test]
    fn test_bounds_are_bijective() {
        let samples = [
            (0u32, 0u32, 0u16),
            (1, 1, 1),
            (MAX_BLOCK_HEIGHT, MAX_TX_INDEX, u16::MAX),
            (500_000, 2_000, 7),
            (MAX_BLOCK_HEIGHT, 0, 0),
            (0, MAX_TX_INDEX, 0),
        ];
        for (block, tx, vout) in samples {
            let scid = ShortChannelId::new(block, tx, vout).unwrap();
            assert_eq!(ShortChannelId::from_packed(scid.packed()), scid);
            assert_eq!(scid.to_string().parse::<ShortChannelId>().unwrap(), scid);
        }
    }

    #[test]
    fn test_packed_values_decode_and_reencode() {
        for packed in [0u64, 1, 65_536, 1 << 40, u64::MAX, 848_960_415_716_409_347] {
            let scid = ShortChannelId::from_packed(packed);
            assert_eq!(scid.packed(), packed);
        }
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(matches!(
            "772125x1829".parse::<ShortChannelId>(),
            Err(ShortChannelIdError::Malformed(_))
        ));
        assert!(matches!(
            "".parse::<ShortChannelId>(),
            Err(ShortChannelIdError::Malformed(_))
        ));
        assert!(matches!(
            "axbxc".parse::<ShortChannelId>(),
            Err(ShortChannelIdError::OutOfRange { .. })
        ));
        assert!(matches!(
            "16777216x0x0".parse::<ShortChannelId>(),
            Err(ShortChannelIdError::OutOfRange {
                part: "block height",
                ..
            })
        ));
        assert!(matches!(
            "1x1x65536".parse::<ShortChannelId>(),
            Err(ShortChannelIdError::OutOfRange {
                part: "output index",
                ..
            })
        ));
    }

    #[test]
    fn test_new_rejects_wide_components() {
        assert!(ShortChannelId::new(MAX_BLOCK_HEIGHT + 1, 0, 0).is_none());
        assert!(ShortChannelId::new(0, MAX_TX_INDEX + 1, 0).is_none());
    }
}
