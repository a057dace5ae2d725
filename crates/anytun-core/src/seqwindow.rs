// SPDX-License-Identifier: MIT

//! Sliding-bitmap anti-replay window, one per sender-id: an anycast
//! cluster member only ever sees a subset of a mux's packets, so the
//! window that guards against replay must be keyed on `sender_id` as
//! well as mux — otherwise two cluster members sharing a mux corrupt
//! each other's sequence tracking.

use std::collections::HashMap;

/// One sender's sliding window of size `W` over its own sequence space.
struct WindowState {
    window_size: u32,
    max: u32,
    pos: u32,
    bits: Vec<bool>,
    initialized: bool,
}

impl WindowState {
    fn new(window_size: u32) -> Self {
        Self {
            window_size,
            max: 0,
            pos: 0,
            bits: vec![false; window_size as usize],
            initialized: false,
        }
    }

    /// Returns `true` iff `seq_nr` is a replay (already seen, or too
    /// old to be represented in the window) and should be dropped.
    fn check_and_add(&mut self, seq_nr: u32) -> bool {
        let w = self.window_size;
        if w == 0 {
            return false;
        }

        if !self.initialized {
            self.max = seq_nr;
            self.pos = 0;
            self.bits.iter_mut().for_each(|b| *b = false);
            self.bits[0] = true;
            self.initialized = true;
            return false;
        }

        let shift = self.max < w || self.max > u32::MAX - w;
        let (max, seq) = if shift {
            (self.max.wrapping_add(1 << 31), seq_nr.wrapping_add(1 << 31))
        } else {
            (self.max, seq_nr)
        };

        let min = max.wrapping_sub(w).wrapping_add(1);
        if seq < min || seq == max {
            return true;
        }

        if seq > max {
            let delta = (seq - max).min(w);
            for i in 1..delta {
                let slot = (self.pos + i) % w;
                self.bits[slot as usize] = false;
            }
            let new_pos = (self.pos + delta) % w;
            self.bits[new_pos as usize] = true;
            self.pos = new_pos;
            self.max = seq_nr;
            false
        } else {
            let delta = max - seq;
            let slot = (self.pos + w - delta) % w;
            let was_set = self.bits[slot as usize];
            self.bits[slot as usize] = true;
            was_set
        }
    }
}

/// A mapping of `sender_id -> WindowState`, lazily populated on first
/// packet from each sender, matching how cluster membership itself is
/// discovered rather than configured up front.
pub struct SeqWindow {
    window_size: u32,
    per_sender: HashMap<u16, WindowState>,
}

impl SeqWindow {
    pub fn new(window_size: u32) -> Self {
        Self {
            window_size,
            per_sender: HashMap::new(),
        }
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Returns `true` iff `seq_nr` is a replay for `sender_id`'s own
    /// sequence space and should be dropped. Creates `sender_id`'s
    /// window on first use.
    pub fn check_and_add(&mut self, sender_id: u16, seq_nr: u32) -> bool {
        let window_size = self.window_size;
        self.per_sender
            .entry(sender_id)
            .or_insert_with(|| WindowState::new(window_size))
            .check_and_add(seq_nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_never_replays() {
        let mut w = SeqWindow::new(0);
        assert!(!w.check_and_add(1, 1));
        assert!(!w.check_and_add(1, 1));
        assert!(!w.check_and_add(1, 0));
    }

    #[test]
    fn first_packet_never_replay() {
        let mut w = SeqWindow::new(64);
        assert!(!w.check_and_add(1, 100));
    }

    #[test]
    fn exact_resend_is_replay() {
        let mut w = SeqWindow::new(64);
        assert!(!w.check_and_add(1, 10));
        assert!(w.check_and_add(1, 10));
    }

    #[test]
    fn in_order_advance_not_replay() {
        let mut w = SeqWindow::new(64);
        assert!(!w.check_and_add(1, 1));
        assert!(!w.check_and_add(1, 2));
        assert!(!w.check_and_add(1, 3));
        assert!(w.check_and_add(1, 2));
    }

    #[test]
    fn out_of_order_within_window_accepted_once() {
        let mut w = SeqWindow::new(16);
        assert!(!w.check_and_add(1, 20));
        assert!(!w.check_and_add(1, 18));
        assert!(w.check_and_add(1, 18));
        assert!(!w.check_and_add(1, 19));
    }

    #[test]
    fn too_old_is_replay() {
        let mut w = SeqWindow::new(16);
        assert!(!w.check_and_add(1, 100));
        assert!(w.check_and_add(1, 10));
    }

    #[test]
    fn wraparound_near_zero() {
        let mut w = SeqWindow::new(16);
        assert!(!w.check_and_add(1, u32::MAX));
        assert!(!w.check_and_add(1, 0));
        assert!(w.check_and_add(1, u32::MAX));
        assert!(!w.check_and_add(1, 2));
    }

    #[test]
    fn distinct_senders_do_not_share_a_window() {
        let mut w = SeqWindow::new(16);
        // Sender A races ahead...
        assert!(!w.check_and_add(1, 100));
        // ...but sender B starting at a much lower sequence is still
        // accepted, because it gets its own lazily-created window.
        assert!(!w.check_and_add(2, 1));
        // Each sender's own replay detection still works independently.
        assert!(w.check_and_add(1, 100));
        assert!(w.check_and_add(2, 1));
    }
}
