//! Motion-in-progress tracker.
//!
//! One motion may span many engine invocations: a jog started while the
//! motor was moving stops it first, jogs, stops again, then runs up to
//! two backlash legs. The tracker records where the axis is in such a
//! sequence as one primary [`Activity`] plus orthogonal [`Overlay`]
//! flags, making conflicting primary activities unrepresentable.
//!
//! Overlay rules: `STOP` and the delay flags may ride on any activity and
//! are cleared by the transition that owns them. `DELAY_REQ` and
//! `DELAY_ACK` are mutually exclusive (the acknowledge consumes the
//! request). "Done" is the all-clear state: `Idle` activity and an empty
//! overlay set.

use bitflags::bitflags;

/// Primary motion activity. At most one is ever underway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activity {
    /// No motion in progress.
    #[default]
    Idle,
    /// Jogging forward.
    JogForward,
    /// Jogging in reverse.
    JogReverse,
    /// Jog button released; stopping before backlash correction.
    JogStopping,
    /// First backlash leg after a jog.
    JogBacklash1,
    /// Second backlash leg after a jog.
    JogBacklash2,
    /// Homing forward.
    HomeForward,
    /// Homing in reverse.
    HomeReverse,
    /// A positioning move (not from a jog or home).
    Move,
    /// Backlash leg after a move.
    MoveBacklash,
    /// A corrective retry move.
    Retry,
    /// Loading a raw position into the controller.
    LoadPosition,
}

bitflags! {
    /// Overlay flags riding on top of the primary activity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Overlay: u8 {
        /// A stop has been commanded; conclusion waits for the motor to
        /// physically stop.
        const STOP      = 0x01;
        /// The settle-delay one-shot has been armed.
        const DELAY_REQ = 0x02;
        /// The settle-delay one-shot has fired.
        const DELAY_ACK = 0x04;
        /// A jog is queued for when the axis is free.
        const JOG_REQ   = 0x08;
    }
}

/// Motion-in-progress state: activity + overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mip {
    activity: Activity,
    overlay: Overlay,
}

impl Mip {
    #[inline]
    pub const fn new() -> Self {
        Self {
            activity: Activity::Idle,
            overlay: Overlay::empty(),
        }
    }

    #[inline]
    pub const fn activity(&self) -> Activity {
        self.activity
    }

    #[inline]
    pub const fn overlay(&self) -> Overlay {
        self.overlay
    }

    /// All clear: no activity, no overlays.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.activity == Activity::Idle && self.overlay.is_empty()
    }

    /// Exactly this activity with an empty overlay set.
    ///
    /// Deliberately narrower than [`activity`](Self::activity) equality:
    /// the reversal safety check and the no-op-move conclusion require
    /// that no stop or delay is riding on the activity.
    #[inline]
    pub fn is_exactly(&self, activity: Activity) -> bool {
        self.activity == activity && self.overlay.is_empty()
    }

    /// A bare stop: no activity, only the stop overlay.
    #[inline]
    pub fn is_bare_stop(&self) -> bool {
        self.activity == Activity::Idle && self.overlay == Overlay::STOP
    }

    /// Jog family (active jog or a jog backlash leg, not the stop phase).
    #[inline]
    pub fn is_jogging(&self) -> bool {
        matches!(
            self.activity,
            Activity::JogForward
                | Activity::JogReverse
                | Activity::JogBacklash1
                | Activity::JogBacklash2
        )
    }

    /// Either homing direction.
    #[inline]
    pub fn is_homing(&self) -> bool {
        matches!(self.activity, Activity::HomeForward | Activity::HomeReverse)
    }

    /// Mid jog-stop or mid jog-backlash; downstream target handling is
    /// suppressed while these run.
    #[inline]
    pub fn in_jog_wind_down(&self) -> bool {
        matches!(
            self.activity,
            Activity::JogStopping | Activity::JogBacklash1 | Activity::JogBacklash2
        )
    }

    /// Switch activity, keeping overlays (the owning transition clears
    /// them explicitly).
    #[inline]
    pub fn begin(&mut self, activity: Activity) {
        self.activity = activity;
    }

    /// Switch activity and drop every overlay.
    #[inline]
    pub fn restart(&mut self, activity: Activity) {
        self.activity = activity;
        self.overlay = Overlay::empty();
    }

    /// Conclude to done: idle, all overlays cleared.
    #[inline]
    pub fn conclude(&mut self) {
        self.activity = Activity::Idle;
        self.overlay = Overlay::empty();
    }

    /// Conclude to done but keep a pending jog request alive.
    #[inline]
    pub fn conclude_keeping_jog_request(&mut self) {
        self.activity = Activity::Idle;
        self.overlay &= Overlay::JOG_REQ;
    }

    /// Become a bare stop: idle activity, stop overlay only.
    #[inline]
    pub fn set_stopping(&mut self) {
        self.activity = Activity::Idle;
        self.overlay = Overlay::STOP;
    }

    // ── Stop overlay ──

    #[inline]
    pub fn request_stop(&mut self) {
        self.overlay |= Overlay::STOP;
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.overlay.contains(Overlay::STOP)
    }

    #[inline]
    pub fn clear_stop(&mut self) {
        self.overlay &= !Overlay::STOP;
    }

    // ── Settle-delay overlay ──

    #[inline]
    pub fn request_delay(&mut self) {
        self.overlay |= Overlay::DELAY_REQ;
        self.overlay &= !Overlay::DELAY_ACK;
    }

    /// The one-shot fired: consume the request, raise the acknowledge.
    #[inline]
    pub fn acknowledge_delay(&mut self) {
        self.overlay &= !Overlay::DELAY_REQ;
        self.overlay |= Overlay::DELAY_ACK;
    }

    /// Raise both delay flags (the refresh-then-decide pass).
    #[inline]
    pub fn hold_delay(&mut self) {
        self.overlay |= Overlay::DELAY_REQ | Overlay::DELAY_ACK;
    }

    #[inline]
    pub fn delay_requested(&self) -> bool {
        self.overlay.contains(Overlay::DELAY_REQ)
    }

    #[inline]
    pub fn delay_acked(&self) -> bool {
        self.overlay.contains(Overlay::DELAY_ACK)
    }

    #[inline]
    pub fn clear_delay(&mut self) {
        self.overlay &= !(Overlay::DELAY_REQ | Overlay::DELAY_ACK);
    }

    // ── Jog-request overlay ──

    #[inline]
    pub fn request_jog(&mut self) {
        self.overlay |= Overlay::JOG_REQ;
    }

    #[inline]
    pub fn jog_requested(&self) -> bool {
        self.overlay.contains(Overlay::JOG_REQ)
    }

    #[inline]
    pub fn clear_jog_request(&mut self) {
        self.overlay &= !Overlay::JOG_REQ;
    }

    /// Classic bit encoding, for publication and diagnostics.
    pub fn bits(&self) -> u16 {
        let activity = match self.activity {
            Activity::Idle => 0x0000,
            Activity::JogForward => 0x0001,
            Activity::JogReverse => 0x0002,
            Activity::JogBacklash1 => 0x0004,
            Activity::HomeForward => 0x0008,
            Activity::HomeReverse => 0x0010,
            Activity::Move => 0x0020,
            Activity::Retry => 0x0040,
            Activity::LoadPosition => 0x0080,
            Activity::MoveBacklash => 0x0100,
            Activity::JogStopping => 0x2000,
            Activity::JogBacklash2 => 0x4000,
        };
        let mut bits = activity;
        if self.overlay.contains(Overlay::STOP) {
            bits |= 0x0200;
        }
        if self.overlay.contains(Overlay::DELAY_REQ) {
            bits |= 0x0400;
        }
        if self.overlay.contains(Overlay::DELAY_ACK) {
            bits |= 0x0800;
        }
        if self.overlay.contains(Overlay::JOG_REQ) {
            bits |= 0x1000;
        }
        bits
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_done() {
        let mip = Mip::new();
        assert!(mip.is_done());
        assert_eq!(mip.bits(), 0);
    }

    #[test]
    fn begin_preserves_overlays() {
        let mut mip = Mip::new();
        mip.request_stop();
        mip.begin(Activity::HomeForward);
        assert_eq!(mip.activity(), Activity::HomeForward);
        assert!(mip.stop_requested());
    }

    #[test]
    fn restart_clears_overlays() {
        let mut mip = Mip::new();
        mip.request_stop();
        mip.request_jog();
        mip.restart(Activity::Move);
        assert_eq!(mip.activity(), Activity::Move);
        assert!(mip.overlay().is_empty());
    }

    #[test]
    fn only_one_primary_activity() {
        // Starting a new activity replaces the old one; two primaries can
        // never coexist.
        let mut mip = Mip::new();
        mip.begin(Activity::JogForward);
        mip.begin(Activity::Move);
        assert_eq!(mip.activity(), Activity::Move);
        assert!(!mip.is_jogging());
    }

    #[test]
    fn exactly_requires_empty_overlay() {
        let mut mip = Mip::new();
        mip.begin(Activity::Move);
        assert!(mip.is_exactly(Activity::Move));
        mip.request_stop();
        assert!(!mip.is_exactly(Activity::Move));
    }

    #[test]
    fn delay_request_and_ack_are_exclusive() {
        let mut mip = Mip::new();
        mip.request_delay();
        assert!(mip.delay_requested());
        assert!(!mip.delay_acked());
        mip.acknowledge_delay();
        assert!(!mip.delay_requested());
        assert!(mip.delay_acked());
    }

    #[test]
    fn conclude_keeping_jog_request() {
        let mut mip = Mip::new();
        mip.begin(Activity::Move);
        mip.request_jog();
        mip.request_stop();
        mip.conclude_keeping_jog_request();
        assert_eq!(mip.activity(), Activity::Idle);
        assert!(mip.jog_requested());
        assert!(!mip.stop_requested());
        assert!(!mip.is_done());
    }

    #[test]
    fn bare_stop() {
        let mut mip = Mip::new();
        mip.begin(Activity::Move);
        mip.set_stopping();
        assert!(mip.is_bare_stop());
        assert_eq!(mip.bits(), 0x0200);
    }

    #[test]
    fn jog_family_predicates() {
        let mut mip = Mip::new();
        mip.begin(Activity::JogBacklash1);
        assert!(mip.is_jogging());
        assert!(mip.in_jog_wind_down());
        mip.begin(Activity::JogStopping);
        assert!(!mip.is_jogging());
        assert!(mip.in_jog_wind_down());
    }

    #[test]
    fn classic_bit_encoding() {
        let mut mip = Mip::new();
        mip.begin(Activity::HomeReverse);
        mip.request_stop();
        assert_eq!(mip.bits(), 0x0010 | 0x0200);

        mip.restart(Activity::JogBacklash2);
        mip.request_jog();
        assert_eq!(mip.bits(), 0x4000 | 0x1000);
    }
}
