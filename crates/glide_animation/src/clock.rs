//! Playback time accounting
//!
//! Every tween and timeline derives its local position from its parent's
//! clock through a [`Playhead`]: `position = (parent - offset) * speed`.
//! Pause, resume, speed changes, and seeks all re-baseline `offset` so the
//! current *position* never jumps; only the rate or reference point moves.
//! Elapsed paused time therefore never counts toward playback.

/// Offset/speed/pause state for one node.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Playhead {
    /// Parent-clock value at which local position is zero
    offset: f64,
    /// Positive rate multiplier
    speed_scale: f64,
    paused: bool,
    /// Parent-clock value when the pause began
    paused_at: f64,
    /// Most recently observed parent-clock value
    last_parent: f64,
}

impl Playhead {
    /// A playhead whose position is zero when the parent clock reads
    /// `offset`.
    pub fn starting_at(offset: f64) -> Self {
        Self {
            offset,
            speed_scale: 1.0,
            paused: false,
            paused_at: offset,
            last_parent: offset,
        }
    }

    /// Record the parent clock. Called at the top of every update, including
    /// updates that no-op because the node is paused, so control calls
    /// between frames re-baseline against the right reference.
    pub fn observe(&mut self, parent: f64) {
        self.last_parent = parent;
    }

    /// Local position for a given parent-clock value.
    pub fn position(&self, parent: f64) -> f64 {
        if self.paused {
            (self.paused_at - self.offset) * self.speed_scale
        } else {
            (parent - self.offset) * self.speed_scale
        }
    }

    /// Local position as of the last observed parent clock.
    pub fn current_position(&self) -> f64 {
        self.position(self.last_parent)
    }

    /// The last observed parent-clock value.
    pub fn last_parent(&self) -> f64 {
        self.last_parent
    }

    /// The reference instant control operations re-baseline against.
    fn reference(&self) -> f64 {
        if self.paused {
            self.paused_at
        } else {
            self.last_parent
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed_scale(&self) -> f64 {
        self.speed_scale
    }

    /// Freeze the position. Returns false if already paused.
    pub fn pause(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.paused = true;
        self.paused_at = self.last_parent;
        true
    }

    /// Unfreeze, shifting `offset` by the paused span so the position
    /// resumes exactly where it froze. Returns false if not paused.
    pub fn resume(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        self.offset += self.last_parent - self.paused_at;
        self.paused = false;
        true
    }

    /// Change the rate without moving the current position.
    pub fn set_speed_scale(&mut self, scale: f64) {
        let held = self.position(self.reference());
        self.speed_scale = scale;
        self.offset = self.reference() - held / scale;
        if self.paused {
            self.paused_at = self.reference();
        }
    }

    /// Re-pin to a discontinuous parent-clock jump. When paused, the pause
    /// reference moves with the jump so the frozen position tracks it.
    pub fn repin(&mut self, parent: f64) {
        self.last_parent = parent;
        if self.paused {
            self.paused_at = parent;
        }
    }

    /// Jump the position to `position` without perturbing the speed scale.
    pub fn seek(&mut self, position: f64) {
        let reference = self.reference();
        self.offset = reference - position / self.speed_scale;
        if self.paused {
            self.paused_at = reference;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_advances_with_parent_clock() {
        let mut head = Playhead::starting_at(100.0);
        head.observe(100.0);
        assert_eq!(head.current_position(), 0.0);
        head.observe(350.0);
        assert_eq!(head.current_position(), 250.0);
    }

    #[test]
    fn test_paused_time_never_counts() {
        let mut head = Playhead::starting_at(0.0);
        head.observe(200.0);
        assert_eq!(head.current_position(), 200.0);

        assert!(head.pause());
        head.observe(700.0); // 500ms pass while paused
        assert_eq!(head.current_position(), 200.0);

        assert!(head.resume());
        head.observe(800.0);
        assert_eq!(head.current_position(), 300.0);
    }

    #[test]
    fn test_speed_change_holds_position() {
        let mut head = Playhead::starting_at(0.0);
        head.observe(400.0);
        assert_eq!(head.current_position(), 400.0);

        head.set_speed_scale(2.0);
        assert!((head.current_position() - 400.0).abs() < 1e-9);

        head.observe(500.0); // 100ms at 2x
        assert!((head.current_position() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_lands_exactly_and_preserves_speed() {
        let mut head = Playhead::starting_at(0.0);
        head.set_speed_scale(3.0);
        head.observe(1000.0);

        head.seek(90.0);
        assert!((head.current_position() - 90.0).abs() < 1e-9);
        assert_eq!(head.speed_scale(), 3.0);

        head.observe(1010.0);
        assert!((head.current_position() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_while_paused_stays_frozen() {
        let mut head = Playhead::starting_at(0.0);
        head.observe(250.0);
        head.pause();
        head.observe(900.0);

        head.seek(50.0);
        assert!((head.current_position() - 50.0).abs() < 1e-9);

        head.resume();
        head.observe(1000.0);
        assert!((head.current_position() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_double_pause_and_resume_are_noops() {
        let mut head = Playhead::starting_at(0.0);
        assert!(head.pause());
        assert!(!head.pause());
        assert!(head.resume());
        assert!(!head.resume());
    }
}
