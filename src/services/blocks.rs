//! Half-hour occupancy blocks and day totals derived from a day's visits.

use crate::db::models::{BlockRecord, VisitRecord};
use crate::utils::{format_time, parse_time, MINUTES_PER_DAY};
use log::warn;

pub const BLOCK_MINUTES: u16 = 30;

/// Start minute of the block containing `minute`. `24:00` belongs to the
/// last block of the day.
pub fn block_start(minute: u16) -> u16 {
    let minute = minute.min(MINUTES_PER_DAY - 1);
    minute / BLOCK_MINUTES * BLOCK_MINUTES
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisitTotals {
    pub regular: i32,
    pub oversize: i32,
    pub combined: i32,
}

pub fn summarize_visits(visits: &[VisitRecord]) -> VisitTotals {
    let oversize = visits.iter().filter(|v| v.is_oversize()).count() as i32;
    let combined = visits.len() as i32;
    VisitTotals {
        regular: combined - oversize,
        oversize,
        combined,
    }
}

#[derive(Debug, Clone, Copy)]
struct Event {
    minute: u16,
    oversize: bool,
    arriving: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Present {
    regular: i32,
    oversize: i32,
}

impl Present {
    fn apply(&mut self, ev: &Event) {
        let delta = if ev.arriving { 1 } else { -1 };
        if ev.oversize {
            self.oversize += delta;
        } else {
            self.regular += delta;
        }
    }

    fn total(&self) -> i32 {
        self.regular + self.oversize
    }
}

fn events(visits: &[VisitRecord]) -> Vec<Event> {
    let mut out = Vec::with_capacity(visits.len() * 2);
    for v in visits {
        let Some(time_in) = parse_time(&v.time_in) else {
            warn!("Blocks: skipping visit with unreadable time_in '{}'", v.time_in);
            continue;
        };
        let oversize = v.is_oversize();
        out.push(Event {
            minute: time_in,
            oversize,
            arriving: true,
        });
        // no duration: the bike stays until the end of the day
        if let Some(d) = v.duration {
            let leave = i32::from(time_in).saturating_add(d.max(0)).min(i32::from(MINUTES_PER_DAY)) as u16;
            out.push(Event {
                minute: leave,
                oversize,
                arriving: false,
            });
        }
    }
    // arrivals first within a minute, so a zero-length visit still counts
    out.sort_by_key(|e| (e.minute, !e.arriving));
    out
}

/// Compute the blocks of one day, from the block of the earliest event to the
/// block of the latest event or of `closing`, whichever is later.
///
/// Occupancy peaks are measured after all events of the same minute have been
/// applied. A block's peak starts at its opening occupancy.
pub fn compute_blocks(visits: &[VisitRecord], closing: Option<&str>) -> Vec<BlockRecord> {
    let events = events(visits);
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return Vec::new();
    };
    let closing = closing.and_then(parse_time).unwrap_or(0);
    let first_block = block_start(first.minute);
    let last_block = block_start(last.minute.max(closing));

    let mut blocks = Vec::new();
    let mut present = Present::default();
    let mut next = 0;
    let mut start = first_block;
    while start <= last_block {
        let end = if start == last_block { u16::MAX } else { start + BLOCK_MINUTES };
        let at_start = present;
        let mut most_full = at_start.total();
        let mut most_full_at = start;

        while next < events.len() && events[next].minute < end {
            let minute = events[next].minute;
            while next < events.len() && events[next].minute == minute {
                present.apply(&events[next]);
                next += 1;
            }
            if present.total() > most_full {
                most_full = present.total();
                most_full_at = minute;
            }
        }

        blocks.push(BlockRecord {
            time_start: format_time(start),
            num_regular_at_start: at_start.regular,
            num_oversize_at_start: at_start.oversize,
            num_regular_at_end: present.regular,
            num_oversize_at_end: present.oversize,
            num_bikes_at_start: at_start.total(),
            num_bikes_at_end: present.total(),
            num_most_full: most_full,
            time_most_full: Some(format_time(most_full_at)),
        });
        start += BLOCK_MINUTES;
    }
    blocks
}
