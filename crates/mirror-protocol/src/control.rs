//! Control message encoding.
//!
//! Every message is one type byte followed by a type-specific payload. All
//! multi-byte integers are big-endian. Text payloads are UTF-8 and silently
//! hard-truncated to their per-kind limit.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::binary::{
    float_to_i32_fixed, float_to_u16_fixed, put_blob_u16, put_string_u32, put_string_u8,
};
use crate::{
    ProtocolError, ProtocolResult, CLIPBOARD_TEXT_MAX_LENGTH, INJECT_TEXT_MAX_LENGTH,
    START_APP_MAX_LENGTH,
};

/// Control message type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlMsgType {
    InjectKeycode = 0,
    InjectText = 1,
    InjectTouchEvent = 2,
    InjectScrollEvent = 3,
    BackOrScreenOn = 4,
    ExpandNotificationPanel = 5,
    ExpandSettingsPanel = 6,
    CollapsePanels = 7,
    GetClipboard = 8,
    SetClipboard = 9,
    SetDisplayPower = 10,
    RotateDevice = 11,
    UhidCreate = 12,
    UhidInput = 13,
    UhidDestroy = 14,
    OpenHardKeyboardSettings = 15,
    StartApp = 16,
    ResetVideo = 17,
}

impl ControlMsgType {
    /// Whether messages of this type carry nothing beyond the type byte.
    pub fn is_simple(self) -> bool {
        matches!(
            self,
            Self::ExpandNotificationPanel
                | Self::ExpandSettingsPanel
                | Self::CollapsePanels
                | Self::RotateDevice
                | Self::OpenHardKeyboardSettings
                | Self::ResetVideo
        )
    }
}

impl TryFrom<u8> for ControlMsgType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0 => Self::InjectKeycode,
            1 => Self::InjectText,
            2 => Self::InjectTouchEvent,
            3 => Self::InjectScrollEvent,
            4 => Self::BackOrScreenOn,
            5 => Self::ExpandNotificationPanel,
            6 => Self::ExpandSettingsPanel,
            7 => Self::CollapsePanels,
            8 => Self::GetClipboard,
            9 => Self::SetClipboard,
            10 => Self::SetDisplayPower,
            11 => Self::RotateDevice,
            12 => Self::UhidCreate,
            13 => Self::UhidInput,
            14 => Self::UhidDestroy,
            15 => Self::OpenHardKeyboardSettings,
            16 => Self::StartApp,
            17 => Self::ResetVideo,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

/// Android `KeyEvent` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

/// Android `MotionEvent` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotionAction {
    Down = 0,
    Up = 1,
    Move = 2,
    Cancel = 3,
    Outside = 4,
    PointerDown = 5,
    PointerUp = 6,
    HoverMove = 7,
    Scroll = 8,
    HoverEnter = 9,
    HoverExit = 10,
    BtnPress = 11,
    BtnRelease = 12,
}

/// Clipboard key the agent should press before reading the clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CopyKey {
    #[default]
    None = 0,
    Copy = 1,
    Cut = 2,
}

/// A point in device frame coordinates, with the frame size it refers to.
///
/// The agent drops events whose reference size does not match its current
/// frame size, which is how stale events across a rotation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub screen_width: u16,
    pub screen_height: u16,
}

impl Position {
    pub fn new(x: i32, y: i32, screen_width: u16, screen_height: u16) -> Self {
        Self {
            x,
            y,
            screen_width,
            screen_height,
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_i32(self.x);
        buf.put_i32(self.y);
        buf.put_u16(self.screen_width);
        buf.put_u16(self.screen_height);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub action: KeyAction,
    pub keycode: u32,
    pub repeat: u32,
    pub meta_state: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchEvent {
    pub action: MotionAction,
    pub pointer_id: u64,
    pub position: Position,
    /// Normalized pressure in `[0, 1]`; out-of-range values are clamped on encode.
    pub pressure: f32,
    pub action_button: u32,
    pub buttons: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollEvent {
    pub position: Position,
    pub hscroll: f32,
    pub vscroll: f32,
    pub buttons: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clipboard {
    /// Echoed back by the agent in its acknowledgement; 0 requests none.
    pub sequence: u64,
    pub text: String,
    pub paste: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UhidCreate {
    pub id: u16,
    pub report_desc: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UhidInput {
    pub id: u16,
    pub data: Vec<u8>,
}

/// Commands made of the type byte alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleCommand {
    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,
    RotateDevice,
    OpenHardKeyboardSettings,
    ResetVideo,
}

impl SimpleCommand {
    pub fn msg_type(self) -> ControlMsgType {
        match self {
            Self::ExpandNotificationPanel => ControlMsgType::ExpandNotificationPanel,
            Self::ExpandSettingsPanel => ControlMsgType::ExpandSettingsPanel,
            Self::CollapsePanels => ControlMsgType::CollapsePanels,
            Self::RotateDevice => ControlMsgType::RotateDevice,
            Self::OpenHardKeyboardSettings => ControlMsgType::OpenHardKeyboardSettings,
            Self::ResetVideo => ControlMsgType::ResetVideo,
        }
    }
}

impl TryFrom<ControlMsgType> for SimpleCommand {
    type Error = ProtocolError;

    fn try_from(msg_type: ControlMsgType) -> Result<Self, Self::Error> {
        Ok(match msg_type {
            ControlMsgType::ExpandNotificationPanel => Self::ExpandNotificationPanel,
            ControlMsgType::ExpandSettingsPanel => Self::ExpandSettingsPanel,
            ControlMsgType::CollapsePanels => Self::CollapsePanels,
            ControlMsgType::RotateDevice => Self::RotateDevice,
            ControlMsgType::OpenHardKeyboardSettings => Self::OpenHardKeyboardSettings,
            ControlMsgType::ResetVideo => Self::ResetVideo,
            other => return Err(ProtocolError::NotSimple(other)),
        })
    }
}

/// An outbound control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Key(KeyEvent),
    Text(String),
    Touch(TouchEvent),
    Scroll(ScrollEvent),
    BackOrScreenOn(KeyAction),
    GetClipboard(CopyKey),
    SetClipboard(Clipboard),
    SetDisplayPower(bool),
    UhidCreate(UhidCreate),
    UhidInput(UhidInput),
    UhidDestroy(u16),
    StartApp(String),
    Simple(SimpleCommand),
}

impl ControlCommand {
    /// Build a payload-less command from its type byte.
    ///
    /// Fails for every type that carries a payload.
    pub fn simple(msg_type: ControlMsgType) -> ProtocolResult<Self> {
        SimpleCommand::try_from(msg_type).map(Self::Simple)
    }

    pub fn msg_type(&self) -> ControlMsgType {
        match self {
            Self::Key(_) => ControlMsgType::InjectKeycode,
            Self::Text(_) => ControlMsgType::InjectText,
            Self::Touch(_) => ControlMsgType::InjectTouchEvent,
            Self::Scroll(_) => ControlMsgType::InjectScrollEvent,
            Self::BackOrScreenOn(_) => ControlMsgType::BackOrScreenOn,
            Self::GetClipboard(_) => ControlMsgType::GetClipboard,
            Self::SetClipboard(_) => ControlMsgType::SetClipboard,
            Self::SetDisplayPower(_) => ControlMsgType::SetDisplayPower,
            Self::UhidCreate(_) => ControlMsgType::UhidCreate,
            Self::UhidInput(_) => ControlMsgType::UhidInput,
            Self::UhidDestroy(_) => ControlMsgType::UhidDestroy,
            Self::StartApp(_) => ControlMsgType::StartApp,
            Self::Simple(cmd) => cmd.msg_type(),
        }
    }

    /// Serialize into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the wire form to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let msg_type = self.msg_type();
        buf.put_u8(msg_type as u8);

        match self {
            Self::Key(key) => {
                buf.put_u8(key.action as u8);
                buf.put_u32(key.keycode);
                buf.put_u32(key.repeat);
                buf.put_u32(key.meta_state);
            }
            Self::Text(text) => put_string_u32(buf, text, INJECT_TEXT_MAX_LENGTH),
            Self::Touch(touch) => {
                buf.put_u8(touch.action as u8);
                buf.put_u64(touch.pointer_id);
                touch.position.put(buf);
                buf.put_u16(float_to_u16_fixed(touch.pressure));
                buf.put_u32(touch.action_button);
                buf.put_u32(touch.buttons);
            }
            Self::Scroll(scroll) => {
                scroll.position.put(buf);
                buf.put_i32(float_to_i32_fixed(scroll.hscroll));
                buf.put_i32(float_to_i32_fixed(scroll.vscroll));
                buf.put_u32(scroll.buttons);
            }
            Self::BackOrScreenOn(action) => buf.put_u8(*action as u8),
            Self::GetClipboard(copy_key) => buf.put_u8(*copy_key as u8),
            Self::SetClipboard(clipboard) => {
                buf.put_u64(clipboard.sequence);
                buf.put_u8(u8::from(clipboard.paste));
                put_string_u32(buf, &clipboard.text, CLIPBOARD_TEXT_MAX_LENGTH);
            }
            Self::SetDisplayPower(on) => buf.put_u8(u8::from(*on)),
            Self::UhidCreate(create) => {
                buf.put_u16(create.id);
                put_blob_u16(buf, &create.report_desc);
            }
            Self::UhidInput(input) => {
                buf.put_u16(input.id);
                put_blob_u16(buf, &input.data);
            }
            Self::UhidDestroy(id) => buf.put_u16(*id),
            Self::StartApp(name) => put_string_u8(buf, name, START_APP_MAX_LENGTH),
            Self::Simple(_) => {}
        }

        trace!(msg_type = ?msg_type, "Encoded control message");
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Self::Key(_) => 14,
            Self::Text(text) => 5 + text.len().min(INJECT_TEXT_MAX_LENGTH),
            Self::Touch(_) => 32,
            Self::Scroll(_) => 25,
            Self::SetClipboard(c) => 14 + c.text.len().min(CLIPBOARD_TEXT_MAX_LENGTH),
            Self::UhidCreate(c) => 5 + c.report_desc.len(),
            Self::UhidInput(i) => 5 + i.data.len(),
            Self::StartApp(name) => 2 + name.len().min(START_APP_MAX_LENGTH),
            _ => 3,
        }
    }
}

impl From<SimpleCommand> for ControlCommand {
    fn from(cmd: SimpleCommand) -> Self {
        Self::Simple(cmd)
    }
}
