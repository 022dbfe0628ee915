//! Translation of host pointer input into touch and scroll commands.
//!
//! The host reports points in view space (the on-screen surface showing the
//! mirrored frame). Commands carry device frame coordinates together with the
//! frame size they refer to, so every point is scaled and clamped first.

use std::hash::Hash;

use tracing::debug;

use crate::control::{ControlCommand, MotionAction, Position, ScrollEvent, TouchEvent};
use crate::keycode::BUTTON_PRIMARY;
use crate::pointer::PointerRegistry;

/// A point in view space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Size of the surface the frame is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewSize {
    pub width: f64,
    pub height: f64,
}

impl ViewSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Pointer state for one mirrored surface.
///
/// Each method returns the commands to write on the control channel; an
/// empty result means the event had no effect on the device.
#[derive(Debug)]
pub struct TouchInput<H> {
    pointers: PointerRegistry<H>,
    view: ViewSize,
    frame_width: u16,
    frame_height: u16,
}

impl<H: Hash + Eq> TouchInput<H> {
    pub fn new(view: ViewSize, frame_width: u16, frame_height: u16) -> Self {
        Self {
            pointers: PointerRegistry::new(),
            view,
            frame_width,
            frame_height,
        }
    }

    /// Map a view point to device frame coordinates.
    pub fn normalize(&self, point: ViewPoint) -> Position {
        if self.view.width <= 0.0 || self.view.height <= 0.0 {
            return self.position(0, 0);
        }

        let frame_w = f64::from(self.frame_width);
        let frame_h = f64::from(self.frame_height);
        let x = (point.x * frame_w / self.view.width).clamp(0.0, frame_w);
        let y = (point.y * frame_h / self.view.height).clamp(0.0, frame_h);

        self.position(x as i32, y as i32)
    }

    pub fn press(&mut self, handle: H, point: ViewPoint) -> ControlCommand {
        let pointer_id = self.pointers.press(handle);
        ControlCommand::Touch(TouchEvent {
            action: MotionAction::Down,
            pointer_id,
            position: self.normalize(point),
            pressure: 1.0,
            action_button: BUTTON_PRIMARY,
            buttons: BUTTON_PRIMARY,
        })
    }

    pub fn move_to(&self, handle: &H, point: ViewPoint) -> Option<ControlCommand> {
        let pointer_id = self.pointers.get(handle)?;
        Some(ControlCommand::Touch(TouchEvent {
            action: MotionAction::Move,
            pointer_id,
            position: self.normalize(point),
            pressure: 1.0,
            action_button: 0,
            buttons: BUTTON_PRIMARY,
        }))
    }

    pub fn release(&mut self, handle: &H, point: ViewPoint) -> Option<ControlCommand> {
        let position = self.normalize(point);
        let pointer_id = self.pointers.release(handle)?;
        Some(ControlCommand::Touch(TouchEvent {
            action: MotionAction::Up,
            pointer_id,
            position,
            pressure: 0.0,
            action_button: BUTTON_PRIMARY,
            buttons: 0,
        }))
    }

    /// The host stopped delivering events for this contact.
    pub fn capture_lost(&mut self, handle: &H) -> Option<ControlCommand> {
        let pointer_id = self.pointers.release(handle)?;
        Some(self.synthetic_up(pointer_id))
    }

    /// Wheel input. Host deltas point the opposite way to Android's.
    pub fn scroll(&self, point: ViewPoint, delta_x: f32, delta_y: f32) -> ControlCommand {
        ControlCommand::Scroll(ScrollEvent {
            position: self.normalize(point),
            hscroll: -delta_x,
            vscroll: -delta_y,
            buttons: 0,
        })
    }

    /// The view was resized. Every live contact is released first.
    pub fn set_view_size(&mut self, view: ViewSize) -> Vec<ControlCommand> {
        let released = self.release_all();
        self.view = view;
        released
    }

    /// The device frame changed size (rotation, reset). Every live contact is
    /// released first, against the old size so the agent accepts the events.
    pub fn set_frame_size(&mut self, width: u16, height: u16) -> Vec<ControlCommand> {
        let released = self.release_all();
        self.frame_width = width;
        self.frame_height = height;
        released
    }

    /// Release every tracked contact at the origin and reset the registry.
    pub fn release_all(&mut self) -> Vec<ControlCommand> {
        let ids = self.pointers.clear();
        if !ids.is_empty() {
            debug!(count = ids.len(), "Releasing all touch points");
        }
        ids.into_iter().map(|id| self.synthetic_up(id)).collect()
    }

    pub fn active_contacts(&self) -> usize {
        self.pointers.len()
    }

    pub fn frame_size(&self) -> (u16, u16) {
        (self.frame_width, self.frame_height)
    }

    fn synthetic_up(&self, pointer_id: u64) -> ControlCommand {
        ControlCommand::Touch(TouchEvent {
            action: MotionAction::Up,
            pointer_id,
            position: self.position(0, 0),
            pressure: 0.0,
            action_button: 0,
            buttons: 0,
        })
    }

    fn position(&self, x: i32, y: i32) -> Position {
        Position::new(x, y, self.frame_width, self.frame_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(cmd: &ControlCommand) -> TouchEvent {
        match cmd {
            ControlCommand::Touch(t) => *t,
            other => panic!("expected touch, got {other:?}"),
        }
    }

    fn input() -> TouchInput<u32> {
        TouchInput::new(ViewSize::new(540.0, 960.0), 1080, 1920)
    }

    #[test]
    fn test_normalize_scales_and_clamps() {
        let input = input();
        assert_eq!(
            input.normalize(ViewPoint::new(270.0, 480.0)),
            Position::new(540, 960, 1080, 1920)
        );
        assert_eq!(
            input.normalize(ViewPoint::new(-10.0, 5000.0)),
            Position::new(0, 1920, 1080, 1920)
        );
    }

    #[test]
    fn test_normalize_empty_view() {
        let input: TouchInput<u32> = TouchInput::new(ViewSize::default(), 1080, 1920);
        assert_eq!(
            input.normalize(ViewPoint::new(10.0, 10.0)),
            Position::new(0, 0, 1080, 1920)
        );
    }

    #[test]
    fn test_press_move_release() {
        let mut input = input();
        let down = touch(&input.press(1, ViewPoint::new(10.0, 10.0)));
        assert_eq!(down.action, MotionAction::Down);
        assert_eq!(down.pointer_id, 0);
        assert_eq!(down.pressure, 1.0);
        assert_eq!(down.action_button, BUTTON_PRIMARY);
        assert_eq!(down.buttons, BUTTON_PRIMARY);

        let mv = touch(&input.move_to(&1, ViewPoint::new(20.0, 20.0)).unwrap());
        assert_eq!(mv.action, MotionAction::Move);
        assert_eq!(mv.position.x, 40);
        assert_eq!(mv.action_button, 0);

        let up = touch(&input.release(&1, ViewPoint::new(20.0, 20.0)).unwrap());
        assert_eq!(up.action, MotionAction::Up);
        assert_eq!(up.pressure, 0.0);
        assert_eq!(up.buttons, 0);
        assert_eq!(input.active_contacts(), 0);
    }

    #[test]
    fn test_unknown_contact_is_ignored() {
        let mut input = input();
        assert!(input.move_to(&5, ViewPoint::default()).is_none());
        assert!(input.release(&5, ViewPoint::default()).is_none());
        assert!(input.capture_lost(&5).is_none());
    }

    #[test]
    fn test_capture_lost_releases_at_origin() {
        let mut input = input();
        input.press(1, ViewPoint::new(100.0, 100.0));
        let up = touch(&input.capture_lost(&1).unwrap());
        assert_eq!(up.action, MotionAction::Up);
        assert_eq!((up.position.x, up.position.y), (0, 0));
        assert!(input.move_to(&1, ViewPoint::default()).is_none());
    }

    #[test]
    fn test_resize_releases_every_contact() {
        let mut input = input();
        input.press(1, ViewPoint::new(1.0, 1.0));
        input.press(2, ViewPoint::new(2.0, 2.0));

        let released = input.set_view_size(ViewSize::new(1080.0, 1920.0));
        let ids: Vec<u64> = released.iter().map(|c| touch(c).pointer_id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!(released
            .iter()
            .all(|c| touch(c).action == MotionAction::Up));
        assert_eq!(input.active_contacts(), 0);

        let down = touch(&input.press(3, ViewPoint::new(1.0, 1.0)));
        assert_eq!(down.pointer_id, 0);
    }

    #[test]
    fn test_frame_change_releases_against_old_size() {
        let mut input = input();
        input.press(1, ViewPoint::new(1.0, 1.0));
        let released = input.set_frame_size(1920, 1080);
        let up = touch(&released[0]);
        assert_eq!(up.position.screen_width, 1080);
        assert_eq!(input.frame_size(), (1920, 1080));
    }

    #[test]
    fn test_scroll_negates_deltas() {
        let input = input();
        match input.scroll(ViewPoint::new(0.0, 0.0), 1.0, -2.0) {
            ControlCommand::Scroll(s) => {
                assert_eq!(s.hscroll, -1.0);
                assert_eq!(s.vscroll, 2.0);
            }
            other => panic!("expected scroll, got {other:?}"),
        }
    }
}
