//! Media geometry and address decoding.
//!
//! This module turns a physical address into media coordinates. It provides:
//! 1. **Geometry:** Per-device parameters (bus width, burst length, row buffer) and
//!    the derived rank, burst and capacity sizes.
//! 2. **Mapping:** The three supported bit orders (`RoRaBaCoCh`, `RoRaBaChCo`, `RoCoRaBaCh`).
//! 3. **Decoder:** Fixed at construction; splits an offset into channel, rank, bank,
//!    row and column.
//!
//! Fields are decoded with mixed-radix arithmetic, so no parameter has to be a
//! power of two.

use crate::common::ConfigError;
use serde::{Deserialize, Serialize};

/// Physical organisation of one media channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MediaGeometry {
    /// Capacity of one device (chip) in bytes.
    pub device_size: u64,
    /// Data pins per device.
    pub device_bus_width: u64,
    /// Beats per burst.
    pub burst_length: u64,
    /// Row buffer size of one device in bytes.
    pub device_rowbuffer_size: u64,
    /// Devices ganged into one rank.
    pub devices_per_rank: u64,
    /// Ranks per channel.
    pub ranks_per_channel: u64,
    /// Banks per rank.
    pub banks_per_rank: u64,
    /// Bank groups per rank; banks are split evenly between groups.
    pub bank_groups_per_rank: u64,
    /// Channels behind one controller.
    pub channels: u64,
}

impl MediaGeometry {
    /// Bytes moved by one burst across the whole rank.
    pub const fn burst_size(&self) -> u64 {
        self.device_bus_width * self.devices_per_rank * self.burst_length / 8
    }

    /// Row buffer size seen by the controller.
    pub const fn row_buffer_size(&self) -> u64 {
        self.device_rowbuffer_size * self.devices_per_rank
    }

    /// Bursts per row buffer.
    pub const fn columns_per_row(&self) -> u64 {
        self.row_buffer_size() / self.burst_size()
    }

    /// Capacity of one rank.
    pub const fn rank_capacity(&self) -> u64 {
        self.device_size * self.devices_per_rank
    }

    /// Capacity of one channel.
    pub const fn channel_capacity(&self) -> u64 {
        self.rank_capacity() * self.ranks_per_channel
    }

    /// Capacity behind the controller.
    pub const fn capacity(&self) -> u64 {
        self.channel_capacity() * self.channels
    }

    /// Rows in each bank.
    pub const fn rows_per_bank(&self) -> u64 {
        self.rank_capacity() / (self.row_buffer_size() * self.banks_per_rank)
    }

    /// Banks in each bank group.
    pub const fn banks_per_group(&self) -> u64 {
        self.banks_per_rank / self.bank_groups_per_rank
    }

    /// Checks that every parameter is positive and the derived sizes divide evenly.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositive`] or [`ConfigError::Geometry`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("device_size", self.device_size),
            ("device_bus_width", self.device_bus_width),
            ("burst_length", self.burst_length),
            ("device_rowbuffer_size", self.device_rowbuffer_size),
            ("devices_per_rank", self.devices_per_rank),
            ("ranks_per_channel", self.ranks_per_channel),
            ("banks_per_rank", self.banks_per_rank),
            ("bank_groups_per_rank", self.bank_groups_per_rank),
            ("channels", self.channels),
        ];
        for (field, value) in fields {
            if value == 0 {
                return Err(ConfigError::NonPositive { field });
            }
        }
        if (self.device_bus_width * self.devices_per_rank * self.burst_length) % 8 != 0 {
            return Err(ConfigError::Geometry("burst is not a whole number of bytes".into()));
        }
        if self.row_buffer_size() % self.burst_size() != 0 {
            return Err(ConfigError::Geometry(format!(
                "row buffer of {} bytes is not a multiple of the {}-byte burst",
                self.row_buffer_size(),
                self.burst_size()
            )));
        }
        if self.banks_per_rank % self.bank_groups_per_rank != 0 {
            return Err(ConfigError::Geometry(format!(
                "{} banks cannot be split into {} bank groups",
                self.banks_per_rank, self.bank_groups_per_rank
            )));
        }
        if self.rows_per_bank() == 0 {
            return Err(ConfigError::Geometry("rank is smaller than one row per bank".into()));
        }
        Ok(())
    }
}

/// Address bit order, most significant field first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMapping {
    /// Row, rank, bank, column, channel: consecutive bursts alternate channels.
    #[default]
    RoRaBaCoCh,
    /// Row, rank, bank, channel, column: a whole row buffer stays on one channel.
    RoRaBaChCo,
    /// Row, column, rank, bank, channel: consecutive bursts spread over banks.
    RoCoRaBaCh,
}

/// Media coordinates of one burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MediaCoord {
    /// Channel index.
    pub channel: usize,
    /// Rank index within the channel.
    pub rank: usize,
    /// Bank index within the rank.
    pub bank: usize,
    /// Row index within the bank.
    pub row: u64,
    /// Burst index within the row.
    pub column: u64,
}

/// Fixed address decoder for one controller.
#[derive(Clone, Copy, Debug)]
pub struct AddressDecoder {
    geometry: MediaGeometry,
    mapping: AddressMapping,
}

impl AddressDecoder {
    /// Creates a decoder for `geometry` using `mapping`.
    pub const fn new(geometry: MediaGeometry, mapping: AddressMapping) -> Self {
        Self { geometry, mapping }
    }

    /// Returns the geometry being decoded.
    pub const fn geometry(&self) -> &MediaGeometry {
        &self.geometry
    }

    /// Returns the bit order in use.
    pub const fn mapping(&self) -> AddressMapping {
        self.mapping
    }

    /// Aligns `offset` down to its burst.
    pub const fn burst_align(&self, offset: u64) -> u64 {
        offset - offset % self.geometry.burst_size()
    }

    /// Decodes a byte offset from the start of the controller's range.
    ///
    /// Offsets beyond the capacity wrap around the row index.
    pub fn decode(&self, offset: u64) -> MediaCoord {
        let g = &self.geometry;
        let mut rest = offset / g.burst_size();
        let mut take = |radix: u64| {
            let field = rest % radix;
            rest /= radix;
            field
        };
        let (channel, column, bank, rank) = match self.mapping {
            AddressMapping::RoRaBaCoCh => {
                let ch = take(g.channels);
                let col = take(g.columns_per_row());
                let bank = take(g.banks_per_rank);
                let rank = take(g.ranks_per_channel);
                (ch, col, bank, rank)
            }
            AddressMapping::RoRaBaChCo => {
                let col = take(g.columns_per_row());
                let ch = take(g.channels);
                let bank = take(g.banks_per_rank);
                let rank = take(g.ranks_per_channel);
                (ch, col, bank, rank)
            }
            AddressMapping::RoCoRaBaCh => {
                let ch = take(g.channels);
                let bank = take(g.banks_per_rank);
                let rank = take(g.ranks_per_channel);
                let col = take(g.columns_per_row());
                (ch, col, bank, rank)
            }
        };
        let row = take(g.rows_per_bank());
        MediaCoord { channel: channel as usize, rank: rank as usize, bank: bank as usize, row, column }
    }

    /// Byte distance between two consecutive rows of the same bank.
    pub const fn row_stride(&self) -> u64 {
        let g = &self.geometry;
        g.row_buffer_size() * g.banks_per_rank * g.ranks_per_channel * g.channels
    }
}
