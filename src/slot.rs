//! Slot choice (§4.6): maps a service's configured `slot_offset` inside a
//! network mode to a hyperperiod slot index and the slot-aligned offset
//! used to compute `mc_begin`.

use std::time::Duration;

/// `choose_service_slot` (§4.6). `slot_duration = hyperperiod_duration /
/// hyperperiod_slots`. Returns `(slot, slot_offset_from_mc_begin)`.
///
/// Monotone in `service_offset_ms` (§8 property 6): a larger offset can
/// never produce a strictly smaller slot index.
pub fn choose_service_slot(
    service_offset_ms: u32,
    hyperperiod_duration: Duration,
    hyperperiod_slots: u32,
) -> (u32, Duration) {
    let slot_duration_ms = (hyperperiod_duration.as_millis() as u64 / hyperperiod_slots.max(1) as u64).max(1);

    let mut test = slot_duration_ms;
    let mut slot = 1u32;
    while (service_offset_ms as u64) >= test {
        test += slot_duration_ms;
        slot += 1;
    }

    // §4.6 boundary: wrap to the next hyperperiod once the slot would spill
    // past the last one.
    let offset = if slot + 1 >= hyperperiod_slots {
        hyperperiod_duration
    } else {
        Duration::from_millis(slot as u64 * slot_duration_ms)
    };

    (slot, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_slot_for_zero_offset() {
        let (slot, offset) = choose_service_slot(0, Duration::from_millis(100), 10);
        assert_eq!(slot, 1);
        assert_eq!(offset, Duration::from_millis(10));
    }

    #[test]
    fn monotone_in_service_offset() {
        let hyperperiod = Duration::from_millis(100);
        let slots = 10;
        let (slot_low, _) = choose_service_slot(5, hyperperiod, slots);
        let (slot_high, _) = choose_service_slot(55, hyperperiod, slots);
        assert!(slot_high >= slot_low);
    }

    #[test]
    fn wraps_to_next_hyperperiod_near_the_end() {
        let hyperperiod = Duration::from_millis(100);
        let slots = 10;
        // slot_duration = 10ms; offset 95ms -> slot 10, slot+1 >= 10 -> wrap.
        let (slot, offset) = choose_service_slot(95, hyperperiod, slots);
        assert_eq!(slot, 10);
        assert_eq!(offset, hyperperiod);
    }
}
