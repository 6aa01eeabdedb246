// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The event subsystem.
//!
//! Event state lives in per-event header registers across three tiers
//! (global, per-partition, per-port-function) plus summary bitmaps above
//! them. Summaries are always read fresh from the chip; nothing here is
//! cached. Blocking waits combine the transport's notification primitive
//! with summary polling, so transports without a notification channel
//! still support waiting, just with polling latency.

use crate::Switch;
use crate::error::Error;
use crate::error::Result;
use pax_proto::event::EVENT_DATA_WORDS;
use pax_proto::event::EventFlags;
use pax_proto::event::EventHeader;
use pax_proto::event::EventId;
use pax_proto::event::EventIndex;
use pax_proto::event::EventSummary;
use pax_proto::event::EventTier;
use pax_proto::event::MAX_PFFS;
use pax_proto::regs;
use pax_proto::regs::GasAddress;
use pax_transport::TransportError;
use std::time::Duration;
use std::time::Instant;

/// What one event control operation observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventControl {
    /// Occurrences since the event was last cleared (before any clear this
    /// operation performed).
    pub count: u32,
    /// The event's vendor data words.
    pub data: [u32; EVENT_DATA_WORDS],
}

impl Switch {
    /// Reads all three summary tiers in one pass.
    pub fn event_summary(&mut self) -> Result<EventSummary> {
        let mut summary = EventSummary {
            global: self.gas_read32(regs::sw_event::GLOBAL_SUMMARY)? as u64,
            part_bitmap: self.gas_read64(regs::sw_event::PART_EVENT_BITMAP)?,
            ..Default::default()
        };

        for part in 0..self.partition_count.min(summary.part.len() as u8) {
            let reg = regs::part_cfg::at(part).offset(regs::part_cfg::PART_EVENT_SUMMARY);
            let value = self.gas_read32(reg)?;
            summary.part[part as usize] = value;
            if part == self.partition {
                summary.local_part = value;
            }
        }

        for pff in 0..MAX_PFFS as u8 {
            let base = regs::pff_csr::at(pff);
            let vendor = self.gas_read16(base.offset(regs::pff_csr::VENDOR_ID))?;
            if vendor != regs::SWITCH_VENDOR_ID {
                break;
            }
            summary.pff[pff as usize] =
                self.gas_read32(base.offset(regs::pff_csr::PFF_EVENT_SUMMARY))?;
        }

        Ok(summary)
    }

    fn event_header_addr(&self, event: EventId, index: u8) -> Result<GasAddress> {
        let addr = match event.tier() {
            EventTier::Global => regs::sw_event::BASE.offset(event.header_offset()),
            EventTier::Partition => {
                if index >= self.partition_count {
                    return Err(Error::Invalid("partition index out of range"));
                }
                regs::part_cfg::at(index).offset(event.header_offset())
            }
            EventTier::PortFunction => {
                if index >= regs::pff_csr::COUNT {
                    return Err(Error::Invalid("port function index out of range"));
                }
                regs::pff_csr::at(index).offset(event.header_offset())
            }
        };
        Ok(addr)
    }

    fn event_ctl_at(
        &mut self,
        event: EventId,
        index: u8,
        flags: EventFlags,
    ) -> Result<EventControl> {
        let addr = self.event_header_addr(event, index)?;
        let header = EventHeader::from_bits(self.gas_read32(addr)?);

        let mut data = [0u32; EVENT_DATA_WORDS];
        for (i, word) in data.iter_mut().enumerate() {
            *word = self.gas_read32(addr.offset(4 * (i as u32 + 1)))?;
        }

        let mut updated = header;
        if !flags.clear() {
            // Bit 0 is write-one-to-clear; writing the occurred flag back
            // unchanged would clear the event.
            updated.set_occurred(false);
        }
        if flags.en_poll() {
            updated.set_en_irq(true);
        }
        if flags.dis_poll() {
            updated.set_en_irq(false);
        }
        if flags.en_log() {
            updated.set_en_log(true);
        }
        if flags.dis_log() {
            updated.set_en_log(false);
        }
        if flags.en_cli() {
            updated.set_en_cli(true);
        }
        if flags.dis_cli() {
            updated.set_en_cli(false);
        }
        if flags.en_fatal() {
            updated.set_fatal(true);
        }
        if flags.dis_fatal() {
            updated.set_fatal(false);
        }

        if flags.any() {
            self.gas_write32(addr, updated.into_bits())?;
        }

        Ok(EventControl {
            count: header.count(),
            data,
        })
    }

    /// Reads an event's header and data, and applies the enable/clear
    /// `flags` if any are set. With no flags this is a pure read.
    ///
    /// An `index` of [`EventIndex::All`] fans out to every valid index of
    /// the event's tier, best effort: the first failing index aborts and
    /// its error is returned. The last index's observation is returned.
    pub fn event_ctl(
        &mut self,
        event: EventId,
        index: EventIndex,
        flags: EventFlags,
    ) -> Result<EventControl> {
        match (event.tier(), index) {
            (EventTier::Global, _) => self.event_ctl_at(event, 0, flags),
            (EventTier::Partition, EventIndex::Local) => {
                self.event_ctl_at(event, self.partition, flags)
            }
            (_, EventIndex::At(index)) => self.event_ctl_at(event, index, flags),
            (tier, EventIndex::All) => {
                let count = match tier {
                    EventTier::Partition => self.partition_count,
                    _ => self.gas_read8(regs::top::PFF_COUNT)?,
                };
                let mut last = EventControl {
                    count: 0,
                    data: [0; EVENT_DATA_WORDS],
                };
                for index in 0..count {
                    last = self.event_ctl_at(event, index, flags)?;
                }
                Ok(last)
            }
            (EventTier::PortFunction, EventIndex::Local) => {
                Err(Error::Invalid("port function events have no local index"))
            }
        }
    }

    /// Blocks until the transport reports an event notification or the
    /// timeout elapses. `None` waits forever; zero polls.
    pub fn event_wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.backend.event_wait(timeout).map_err(Error::Backend)
    }

    /// Clears and arms `event` at `index`, then waits until it occurs or
    /// `timeout` elapses. Returns whether the event was observed.
    ///
    /// Transports without a notification primitive are polled at the
    /// handle's pacing interval instead.
    pub fn event_wait_for(
        &mut self,
        event: EventId,
        index: EventIndex,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let resolved = match (event.tier(), index) {
            (EventTier::Partition, EventIndex::Local) => EventIndex::At(self.partition),
            (_, other) => other,
        };
        let mut mask = EventSummary::default();
        mask.set(event, resolved);

        self.event_ctl(
            event,
            index,
            EventFlags::new().with_clear(true).with_en_poll(true),
        )?;

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.event_summary()?.intersects(&mask) {
                return Ok(true);
            }

            let remaining = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    Some(deadline - now)
                }
            };

            match self.backend.event_wait(remaining) {
                Ok(_) => {}
                Err(TransportError::NotSupported) => {
                    // Fall back to summary polling.
                    let interval = self.pacing.interval;
                    let sleep = match remaining {
                        Some(remaining) => remaining.min(interval),
                        None => interval,
                    };
                    if !sleep.is_zero() {
                        std::thread::sleep(sleep);
                    }
                }
                Err(err) => return Err(Error::Backend(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::open_sim;
    use pax_proto::event::EventHeader;

    fn header_addr(event: EventId, index: u8) -> GasAddress {
        match event.tier() {
            EventTier::Global => regs::sw_event::BASE.offset(event.header_offset()),
            EventTier::Partition => regs::part_cfg::at(index).offset(event.header_offset()),
            EventTier::PortFunction => regs::pff_csr::at(index).offset(event.header_offset()),
        }
    }

    #[test]
    fn summary_reads_all_tiers() {
        let (mut dev, ctl) = open_sim();
        ctl.poke(regs::sw_event::GLOBAL_SUMMARY, &0x81u32.to_le_bytes());
        ctl.poke(regs::sw_event::PART_EVENT_BITMAP, &0x1u64.to_le_bytes());
        ctl.poke(
            regs::part_cfg::at(0).offset(regs::part_cfg::PART_EVENT_SUMMARY),
            &0x2u32.to_le_bytes(),
        );
        ctl.poke(
            regs::pff_csr::at(1).offset(regs::pff_csr::PFF_EVENT_SUMMARY),
            &0x20u32.to_le_bytes(),
        );

        let summary = dev.event_summary().unwrap();
        assert_eq!(summary.global, 0x81);
        assert_eq!(summary.part_bitmap, 0x1);
        assert_eq!(summary.part[0], 0x2);
        assert_eq!(summary.local_part, 0x2);
        assert_eq!(summary.pff[1], 0x20);
        // Only two PFF blocks carry the vendor id in the simulator.
        assert_eq!(summary.pff[2], 0);
    }

    #[test]
    fn plain_read_does_not_clear_the_latch() {
        let (mut dev, ctl) = open_sim();
        let addr = header_addr(EventId::Hotplug, 1);
        let header = EventHeader::new().with_occurred(true).with_count(3);
        ctl.poke(addr, &header.into_bits().to_le_bytes());

        let ctl_read = dev
            .event_ctl(EventId::Hotplug, EventIndex::At(1), EventFlags::new())
            .unwrap();
        assert_eq!(ctl_read.count, 3);

        // A pure read writes nothing back; the latch is untouched.
        let raw = u32::from_le_bytes(ctl.peek(addr, 4).try_into().unwrap());
        assert!(EventHeader::from_bits(raw).occurred());
    }

    #[test]
    fn enable_preserves_the_latch_and_clear_clears_it() {
        let (mut dev, ctl) = open_sim();
        let addr = header_addr(EventId::PartitionReset, 0);
        ctl.poke(
            addr,
            &EventHeader::new().with_occurred(true).into_bits().to_le_bytes(),
        );

        // Enabling without clear must not write the occurred bit back.
        dev.event_ctl(
            EventId::PartitionReset,
            EventIndex::Local,
            EventFlags::new().with_en_log(true),
        )
        .unwrap();
        let raw = u32::from_le_bytes(ctl.peek(addr, 4).try_into().unwrap());
        let header = EventHeader::from_bits(raw);
        assert!(header.en_log());
        assert!(!header.occurred(), "enable must not re-latch the event");

        // An explicit clear writes bit 0.
        ctl.poke(
            addr,
            &EventHeader::new().with_occurred(true).into_bits().to_le_bytes(),
        );
        dev.event_ctl(
            EventId::PartitionReset,
            EventIndex::Local,
            EventFlags::new().with_clear(true),
        )
        .unwrap();
        let raw = u32::from_le_bytes(ctl.peek(addr, 4).try_into().unwrap());
        assert!(EventHeader::from_bits(raw).occurred());
    }

    #[test]
    fn fan_out_stops_at_the_first_invalid_index() {
        let (mut dev, _ctl) = open_sim();
        // Partition tier has one valid index; an explicit out-of-range
        // index is rejected.
        assert!(matches!(
            dev.event_ctl(
                EventId::PartitionReset,
                EventIndex::At(5),
                EventFlags::new()
            ),
            Err(Error::Invalid(_))
        ));
        // All-index fan-out stays within the valid range and succeeds.
        dev.event_ctl(EventId::PartitionReset, EventIndex::All, EventFlags::new())
            .unwrap();
    }

    #[test]
    fn wait_for_times_out_when_nothing_happens() {
        let (mut dev, _ctl) = open_sim();
        let start = Instant::now();
        let hit = dev
            .event_wait_for(
                EventId::Hotplug,
                EventIndex::At(0),
                Some(Duration::from_millis(100)),
            )
            .unwrap();
        assert!(!hit);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn wait_for_sees_an_armed_event() {
        let (mut dev, ctl) = open_sim();
        let addr = header_addr(EventId::Hotplug, 0);
        ctl.poke(
            addr,
            &EventHeader::new().with_occurred(true).into_bits().to_le_bytes(),
        );
        ctl.poke(
            regs::pff_csr::at(0).offset(regs::pff_csr::PFF_EVENT_SUMMARY),
            &(EventId::Hotplug.summary_bit() as u32).to_le_bytes(),
        );
        ctl.arm_event();

        let hit = dev
            .event_wait_for(
                EventId::Hotplug,
                EventIndex::At(0),
                Some(Duration::from_secs(5)),
            )
            .unwrap();
        assert!(hit);
    }
}
