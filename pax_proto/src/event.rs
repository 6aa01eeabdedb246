// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Event model.
//!
//! Events live in a three-tier namespace: global events, per-partition
//! events, and per-port-function events. Each event owns a header register
//! (enable bits, a latched occurred flag, and an occurrence counter)
//! followed by up to five vendor data words. Tier summaries are bitmaps
//! with one well-known bit per event.

use bitfield_struct::bitfield;

/// Number of partition event summary slots.
pub const MAX_PARTITIONS: usize = 48;
/// Number of port-function event summary slots.
pub const MAX_PFFS: usize = 48;

/// Number of vendor data words following an event header.
pub const EVENT_DATA_WORDS: usize = 5;

/// The tier an event belongs to, which determines how its index is
/// interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTier {
    /// One instance per switch.
    Global,
    /// One instance per partition.
    Partition,
    /// One instance per port function.
    PortFunction,
}

/// Which instance(s) of a partition or port-function event an operation
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventIndex {
    /// The partition the handle is attached to. Only meaningful for
    /// partition-tier events.
    Local,
    /// Every valid index of the event's tier.
    All,
    /// One explicit index.
    At(u8),
}

macro_rules! events {
    ($($name:ident => ($tier:ident, $bit:expr, $offset:expr, $desc:literal),)*) => {
        /// Every event the switch can report.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventId {
            $(
                #[doc = $desc]
                $name,
            )*
        }

        impl EventId {
            /// All events, in tier order.
            pub const ALL: &'static [EventId] = &[$(EventId::$name,)*];

            /// The tier this event belongs to.
            pub const fn tier(self) -> EventTier {
                match self {
                    $(EventId::$name => EventTier::$tier,)*
                }
            }

            /// This event's bit in its tier's summary word.
            pub const fn summary_bit(self) -> u64 {
                match self {
                    $(EventId::$name => 1 << $bit,)*
                }
            }

            /// Byte offset of this event's header register within its tier
            /// block (the global event block, one partition block, or one
            /// port-function block).
            pub const fn header_offset(self) -> u32 {
                match self {
                    $(EventId::$name => $offset,)*
                }
            }

            /// Short human-readable description.
            pub const fn describe(self) -> &'static str {
                match self {
                    $(EventId::$name => $desc,)*
                }
            }
        }
    };
}

events! {
    StackError => (Global, 0, 0x30, "Stack Error"),
    PpuError => (Global, 1, 0x48, "PPU Error"),
    IspError => (Global, 2, 0x60, "ISP Error"),
    SysReset => (Global, 3, 0x78, "System Reset"),
    FwException => (Global, 4, 0x90, "Firmware Exception"),
    FwNmi => (Global, 5, 0xa8, "Firmware Non-Maskable Interrupt"),
    FwNonFatal => (Global, 6, 0xc0, "Firmware Non-Fatal Error"),
    FwFatal => (Global, 7, 0xd8, "Firmware Fatal Error"),
    TwiMrpcComp => (Global, 8, 0xf0, "TWI MRPC Completion"),
    TwiMrpcCompAsync => (Global, 9, 0x108, "TWI MRPC Async Completion"),
    CliMrpcComp => (Global, 10, 0x120, "CLI MRPC Completion"),
    CliMrpcCompAsync => (Global, 11, 0x138, "CLI MRPC Async Completion"),
    GpioInterrupt => (Global, 12, 0x150, "GPIO Interrupt"),
    Gfms => (Global, 13, 0x168, "Global Fabric Management Server Event"),
    PartitionReset => (Partition, 0, 0x124, "Partition Reset"),
    MrpcComp => (Partition, 1, 0x13c, "MRPC Completion"),
    MrpcCompAsync => (Partition, 2, 0x154, "MRPC Async Completion"),
    DynPartBindComp => (Partition, 3, 0x16c, "Dynamic Partition Binding Completion"),
    AerInP2p => (PortFunction, 0, 0xc10, "Advanced Error Reporting in P2P Port"),
    AerInVep => (PortFunction, 1, 0xc28, "Advanced Error Reporting in vEP"),
    Dpc => (PortFunction, 2, 0xc40, "Downstream Port Containment Event"),
    Cts => (PortFunction, 3, 0xc58, "Completion Timeout Synthesis Event"),
    Uec => (PortFunction, 4, 0xc70, "Uncorrectable Error Containment Event"),
    Hotplug => (PortFunction, 5, 0xc88, "Hotplug Event"),
    Ier => (PortFunction, 6, 0xca0, "Internal Error Reporting Event"),
    Threshold => (PortFunction, 7, 0xcb8, "Event Counter Threshold Reached"),
    PowerMgmt => (PortFunction, 8, 0xcd0, "Power Management Event"),
    TlpThrottling => (PortFunction, 9, 0xce8, "TLP Throttling Event"),
    ForceSpeed => (PortFunction, 10, 0xd00, "Force Speed Error"),
    CreditTimeout => (PortFunction, 11, 0xd18, "Credit Timeout"),
    LinkState => (PortFunction, 12, 0xd30, "Link State Change Event"),
}

/// An event header register.
///
/// The occurred bit position doubles as the write-one-to-clear position, so
/// a read-modify-write that should not clear the event must mask bit 0 back
/// out before writing.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EventHeader {
    /// Latched on occurrence; cleared by writing a one.
    pub occurred: bool,
    /// Record the event in the chip log.
    pub en_log: bool,
    /// Report the event on the chip CLI.
    pub en_cli: bool,
    /// Raise the event interrupt (and make it poll-visible).
    pub en_irq: bool,
    /// Treat the event as fatal.
    pub fatal: bool,
    /// Occurrences since last clear.
    #[bits(8)]
    pub count: u32,
    #[bits(19)]
    _reserved: u32,
}

/// Flags selecting what an event control operation changes. All clear means
/// a pure read.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct EventFlags {
    /// Clear the latched occurred flag and counter.
    pub clear: bool,
    /// Enable interrupt/poll reporting.
    pub en_poll: bool,
    /// Enable logging.
    pub en_log: bool,
    /// Enable CLI reporting.
    pub en_cli: bool,
    /// Mark fatal.
    pub en_fatal: bool,
    /// Disable interrupt/poll reporting.
    pub dis_poll: bool,
    /// Disable logging.
    pub dis_log: bool,
    /// Disable CLI reporting.
    pub dis_cli: bool,
    /// Unmark fatal.
    pub dis_fatal: bool,
    #[bits(7)]
    _reserved: u16,
}

impl EventFlags {
    /// Whether any flag is set, i.e. whether the control operation writes
    /// the header back.
    pub fn any(&self) -> bool {
        self.into_bits() != 0
    }
}

/// A snapshot of the three summary tiers, refreshed on demand and never
/// cached across calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSummary {
    /// Global tier summary.
    pub global: u64,
    /// Bitmap of partitions with any pending event.
    pub part_bitmap: u64,
    /// Summary of the handle's own partition.
    pub local_part: u32,
    /// Per-partition summaries.
    pub part: [u32; MAX_PARTITIONS],
    /// Per-port-function summaries.
    pub pff: [u32; MAX_PFFS],
}

impl Default for EventSummary {
    fn default() -> Self {
        EventSummary {
            global: 0,
            part_bitmap: 0,
            local_part: 0,
            part: [0; MAX_PARTITIONS],
            pff: [0; MAX_PFFS],
        }
    }
}

impl EventSummary {
    /// Sets the bit(s) for `event` at `index`. `index` must already be
    /// resolved (`Local` replaced with the handle's partition).
    pub fn set(&mut self, event: EventId, index: EventIndex) {
        let bit = event.summary_bit();
        match event.tier() {
            EventTier::Global => self.global |= bit,
            EventTier::Partition => match index {
                EventIndex::All => {
                    for part in &mut self.part {
                        *part |= bit as u32;
                    }
                    self.local_part |= bit as u32;
                }
                EventIndex::At(i) => {
                    if let Some(part) = self.part.get_mut(i as usize) {
                        *part |= bit as u32;
                    }
                }
                EventIndex::Local => self.local_part |= bit as u32,
            },
            EventTier::PortFunction => match index {
                EventIndex::All => {
                    for pff in &mut self.pff {
                        *pff |= bit as u32;
                    }
                }
                EventIndex::At(i) => {
                    if let Some(pff) = self.pff.get_mut(i as usize) {
                        *pff |= bit as u32;
                    }
                }
                EventIndex::Local => {}
            },
        }
    }

    /// Whether any bit set in `mask` is also set here.
    pub fn intersects(&self, mask: &EventSummary) -> bool {
        if self.global & mask.global != 0 {
            return true;
        }
        if self.local_part & mask.local_part != 0 {
            return true;
        }
        if self
            .part
            .iter()
            .zip(&mask.part)
            .any(|(a, b)| a & b != 0)
        {
            return true;
        }
        self.pff.iter().zip(&mask.pff).any(|(a, b)| a & b != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_bits_are_unique() {
        for tier in [
            EventTier::Global,
            EventTier::Partition,
            EventTier::PortFunction,
        ] {
            let mut seen = 0u64;
            for &e in EventId::ALL.iter().filter(|e| e.tier() == tier) {
                assert_eq!(seen & e.summary_bit(), 0, "{e:?}");
                seen |= e.summary_bit();
            }
        }
    }

    #[test]
    fn header_offsets_do_not_collide() {
        for tier in [
            EventTier::Global,
            EventTier::Partition,
            EventTier::PortFunction,
        ] {
            let mut offsets: Vec<_> = EventId::ALL
                .iter()
                .filter(|e| e.tier() == tier)
                .map(|e| e.header_offset())
                .collect();
            offsets.sort_unstable();
            for pair in offsets.windows(2) {
                // A header plus five data words never overlaps its neighbor.
                assert!(pair[0] + 4 * (1 + EVENT_DATA_WORDS as u32) <= pair[1]);
            }
        }
    }

    #[test]
    fn summary_set_and_intersect() {
        let mut mask = EventSummary::default();
        mask.set(EventId::Hotplug, EventIndex::At(7));

        let mut seen = EventSummary::default();
        assert!(!seen.intersects(&mask));
        seen.set(EventId::Hotplug, EventIndex::At(6));
        assert!(!seen.intersects(&mask));
        seen.set(EventId::Hotplug, EventIndex::At(7));
        assert!(seen.intersects(&mask));
    }

    #[test]
    fn header_bit_layout() {
        let hdr = EventHeader::from_bits(0x61);
        assert!(hdr.occurred());
        assert_eq!(hdr.count(), 3);
        assert!(!hdr.fatal());
    }
}
