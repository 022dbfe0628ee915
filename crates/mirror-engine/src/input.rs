//! Host input to control messages.

use std::io::Write;

use parking_lot::Mutex;
use tracing::{debug, trace};

use mirror_protocol::keycode::HardwareButton;
use mirror_protocol::{
    Clipboard, ControlCommand, CopyKey, KeyAction, KeyEvent, SimpleCommand, TouchInput, ViewPoint,
    ViewSize,
};
use mirror_transport::ControlChannel;

use crate::{EngineError, EngineResult};

/// Host pointer handle. Any per-contact id the UI layer hands out.
pub type PointerHandle = u64;

/// Translates host input into control messages and writes them.
///
/// Pointer state is updated and the resulting messages are written under
/// one lock, so the device sees contacts in the order they happened.
pub struct InputController<W> {
    touch: Mutex<TouchInput<PointerHandle>>,
    control: Option<ControlChannel<W>>,
}

impl<W: Write> InputController<W> {
    pub fn new(control: Option<ControlChannel<W>>, view: ViewSize) -> Self {
        Self {
            touch: Mutex::new(TouchInput::new(view, 0, 0)),
            control,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.control.as_ref().map_or(false, |c| !c.is_closed())
    }

    /// Write one command as-is.
    pub fn send(&self, command: &ControlCommand) -> EngineResult<()> {
        let control = self.control.as_ref().ok_or(EngineError::ControlDisabled)?;
        control.send(command)?;
        Ok(())
    }

    fn send_all(&self, commands: &[ControlCommand]) -> EngineResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let control = self.control.as_ref().ok_or(EngineError::ControlDisabled)?;
        control.send_all(commands)?;
        Ok(())
    }

    pub fn pointer_down(&self, handle: PointerHandle, point: ViewPoint) -> EngineResult<()> {
        let mut touch = self.touch.lock();
        let command = touch.press(handle, point);
        trace!(handle, "Pointer down");
        self.send(&command)
    }

    /// Moves of a contact that was never pressed are ignored.
    pub fn pointer_move(&self, handle: PointerHandle, point: ViewPoint) -> EngineResult<()> {
        let touch = self.touch.lock();
        match touch.move_to(&handle, point) {
            Some(command) => self.send(&command),
            None => Ok(()),
        }
    }

    pub fn pointer_up(&self, handle: PointerHandle, point: ViewPoint) -> EngineResult<()> {
        let mut touch = self.touch.lock();
        match touch.release(&handle, point) {
            Some(command) => self.send(&command),
            None => Ok(()),
        }
    }

    /// The host lost track of a contact without a release.
    pub fn pointer_capture_lost(&self, handle: PointerHandle) -> EngineResult<()> {
        let mut touch = self.touch.lock();
        match touch.capture_lost(&handle) {
            Some(command) => self.send(&command),
            None => Ok(()),
        }
    }

    pub fn wheel(&self, point: ViewPoint, delta_x: f32, delta_y: f32) -> EngineResult<()> {
        let touch = self.touch.lock();
        self.send(&touch.scroll(point, delta_x, delta_y))
    }

    /// The host view changed size.
    pub fn resize_view(&self, view: ViewSize) -> EngineResult<()> {
        let mut touch = self.touch.lock();
        let released = touch.set_view_size(view);
        self.send_all(&released)
    }

    /// The device frame changed size.
    pub fn set_frame_size(&self, width: u32, height: u32) -> EngineResult<()> {
        let width = u16::try_from(width).unwrap_or(u16::MAX);
        let height = u16::try_from(height).unwrap_or(u16::MAX);

        let mut touch = self.touch.lock();
        if touch.frame_size() == (width, height) {
            return Ok(());
        }
        debug!(width, height, "Device frame size changed");
        let released = touch.set_frame_size(width, height);
        match self.send_all(&released) {
            Err(EngineError::ControlDisabled) => Ok(()),
            other => other,
        }
    }

    /// Release every live contact.
    pub fn release_all(&self) -> EngineResult<()> {
        let mut touch = self.touch.lock();
        let released = touch.release_all();
        self.send_all(&released)
    }

    pub fn active_contacts(&self) -> usize {
        self.touch.lock().active_contacts()
    }

    pub fn frame_size(&self) -> (u16, u16) {
        self.touch.lock().frame_size()
    }

    pub fn key(&self, action: KeyAction, keycode: u32, meta_state: u32) -> EngineResult<()> {
        self.send(&ControlCommand::Key(KeyEvent {
            action,
            keycode,
            repeat: 0,
            meta_state,
        }))
    }

    /// Press and release a key.
    pub fn tap_key(&self, keycode: u32) -> EngineResult<()> {
        let down = KeyEvent {
            action: KeyAction::Down,
            keycode,
            repeat: 0,
            meta_state: 0,
        };
        let up = KeyEvent {
            action: KeyAction::Up,
            ..down
        };
        self.send_all(&[ControlCommand::Key(down), ControlCommand::Key(up)])
    }

    pub fn hardware_button(&self, button: HardwareButton) -> EngineResult<()> {
        self.tap_key(button.keycode())
    }

    /// Press back, or turn the screen on if it is off.
    pub fn back_or_screen_on(&self) -> EngineResult<()> {
        self.send_all(&[
            ControlCommand::BackOrScreenOn(KeyAction::Down),
            ControlCommand::BackOrScreenOn(KeyAction::Up),
        ])
    }

    pub fn inject_text(&self, text: &str) -> EngineResult<()> {
        self.send(&ControlCommand::Text(text.to_string()))
    }

    pub fn get_clipboard(&self, copy_key: CopyKey) -> EngineResult<()> {
        self.send(&ControlCommand::GetClipboard(copy_key))
    }

    pub fn set_clipboard(&self, sequence: u64, text: &str, paste: bool) -> EngineResult<()> {
        self.send(&ControlCommand::SetClipboard(Clipboard {
            sequence,
            text: text.to_string(),
            paste,
        }))
    }

    pub fn set_display_power(&self, on: bool) -> EngineResult<()> {
        self.send(&ControlCommand::SetDisplayPower(on))
    }

    pub fn start_app(&self, name: &str) -> EngineResult<()> {
        self.send(&ControlCommand::StartApp(name.to_string()))
    }

    pub fn simple(&self, command: SimpleCommand) -> EngineResult<()> {
        self.send(&ControlCommand::Simple(command))
    }

    /// Stop writing. Later sends fail.
    pub fn close(&self) {
        if let Some(control) = &self.control {
            control.close();
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.control.as_ref().map_or(0, |c| c.messages_sent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::keycode::KEYCODE_HOME;
    use mirror_transport::TransportError;
    use std::io;
    use std::sync::Arc;

    /// Writer whose contents stay visible after it moves into the channel.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn controller() -> (InputController<SharedBuf>, SharedBuf) {
        let buf = SharedBuf::default();
        let input = InputController::new(
            Some(ControlChannel::new(buf.clone())),
            ViewSize::new(540.0, 1200.0),
        );
        input.set_frame_size(1080, 2400).unwrap();
        (input, buf)
    }

    /// Split the written stream into touch messages (type 2, 32 bytes).
    fn touch_messages(buf: &SharedBuf) -> Vec<Vec<u8>> {
        let bytes = buf.0.lock().clone();
        assert_eq!(bytes.len() % 32, 0, "unexpected message mix");
        bytes.chunks(32).map(<[u8]>::to_vec).collect()
    }

    fn pointer_id(message: &[u8]) -> u64 {
        u64::from_be_bytes(message[2..10].try_into().unwrap())
    }

    #[test]
    fn test_pointer_lifecycle() {
        let (input, buf) = controller();
        input.pointer_down(7, ViewPoint::new(270.0, 600.0)).unwrap();
        input.pointer_move(7, ViewPoint::new(280.0, 610.0)).unwrap();
        input.pointer_up(7, ViewPoint::new(280.0, 610.0)).unwrap();

        let messages = touch_messages(&buf);
        assert_eq!(messages.len(), 3);
        // Down, Move, Up; all on pointer 0.
        assert_eq!(
            messages.iter().map(|m| m[1]).collect::<Vec<_>>(),
            vec![0, 2, 1]
        );
        assert!(messages.iter().all(|m| pointer_id(m) == 0));
        // View point (270, 600) is the frame centre.
        assert_eq!(&messages[0][10..14], &540i32.to_be_bytes());
        assert_eq!(&messages[0][14..18], &1200i32.to_be_bytes());
    }

    #[test]
    fn test_untracked_pointer_is_ignored() {
        let (input, buf) = controller();
        input.pointer_move(3, ViewPoint::new(1.0, 1.0)).unwrap();
        input.pointer_up(3, ViewPoint::new(1.0, 1.0)).unwrap();
        input.pointer_capture_lost(3).unwrap();
        assert!(buf.0.lock().is_empty());
    }

    #[test]
    fn test_resize_releases_contacts() {
        let (input, buf) = controller();
        input.pointer_down(1, ViewPoint::new(10.0, 10.0)).unwrap();
        input.pointer_down(2, ViewPoint::new(20.0, 20.0)).unwrap();
        input.resize_view(ViewSize::new(1080.0, 2400.0)).unwrap();
        assert_eq!(input.active_contacts(), 0);

        let messages = touch_messages(&buf);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2][1], 1);
        assert_eq!(messages[3][1], 1);
        assert_eq!(pointer_id(&messages[2]), 0);
        assert_eq!(pointer_id(&messages[3]), 1);

        // Registry restarts at 0.
        input.pointer_down(9, ViewPoint::new(5.0, 5.0)).unwrap();
        assert_eq!(pointer_id(&touch_messages(&buf)[4]), 0);
    }

    #[test]
    fn test_frame_size_change_releases_against_old_size() {
        let (input, buf) = controller();
        input.pointer_down(1, ViewPoint::new(10.0, 10.0)).unwrap();
        input.set_frame_size(2400, 1080).unwrap();

        let messages = touch_messages(&buf);
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[1][18..20], &1080u16.to_be_bytes());
        assert_eq!(&messages[1][20..22], &2400u16.to_be_bytes());
        assert_eq!(input.frame_size(), (2400, 1080));
    }

    #[test]
    fn test_tap_key_writes_down_then_up() {
        let (input, buf) = controller();
        input.tap_key(KEYCODE_HOME).unwrap();
        let bytes = buf.0.lock().clone();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[..2], [0, 0]);
        assert_eq!(bytes[14..16], [0, 1]);
        assert_eq!(input.messages_sent(), 2);
    }

    #[test]
    fn test_disabled_control() {
        let input: InputController<SharedBuf> =
            InputController::new(None, ViewSize::new(100.0, 100.0));
        assert!(!input.is_enabled());
        assert!(matches!(
            input.simple(SimpleCommand::RotateDevice),
            Err(EngineError::ControlDisabled)
        ));
        // Geometry updates still work without a channel.
        input.set_frame_size(720, 1280).unwrap();
        assert_eq!(input.frame_size(), (720, 1280));
    }

    #[test]
    fn test_closed_channel_reports_transport_error() {
        let (input, _buf) = controller();
        input.close();
        assert!(matches!(
            input.set_display_power(false),
            Err(EngineError::Transport(TransportError::ConnectionClosed))
        ));
    }
}
