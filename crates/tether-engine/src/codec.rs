//! Patch Wire Codec.
//!
//! Messages are an integer opcode followed by a fixed number of scalars, laid
//! back to back in one [`Frame`]. Every server frame opens with
//! `Frame(seq)`; client frames carry no header. Decoding dispatches through a
//! static table indexed by opcode.

use tether_core::errors::BridgeError;
use tether_core::frame::{Frame, FrameReader};
use tether_core::patch::PatchOp;
use tether_core::path::Path;

/// Server→client opcodes.
pub mod server_op {
    pub const FRAME: u64 = 0;
    pub const SET_RENDER_NUM: u64 = 1;
    pub const CREATE_ELEMENT: u64 = 2;
    pub const CREATE_TEXT: u64 = 3;
    pub const REMOVE_NODE: u64 = 4;
    pub const SET_ATTR: u64 = 5;
    pub const REMOVE_ATTR: u64 = 6;
    pub const SET_STYLE: u64 = 7;
    pub const REMOVE_STYLE: u64 = 8;
    pub const SET_PROPERTY: u64 = 9;
    pub const ADD_EVENT_LISTENER: u64 = 10;
    pub const REMOVE_EVENT_LISTENER: u64 = 11;
    pub const EXTRACT_PROPERTY: u64 = 12;
    pub const EVALUATE: u64 = 13;
    pub const REDIRECT: u64 = 14;
    pub const SET_TITLE: u64 = 15;
    pub const CHANGE_PAGE_URL: u64 = 16;
    pub const CLEAR: u64 = 17;
}

/// Client→server opcodes.
pub mod client_op {
    pub const CALLBACK_ACK: u64 = 0;
    pub const DOM_EVENT: u64 = 1;
    pub const RESOLVE_PROPERTY: u64 = 2;
    pub const EVALUATE_RESULT: u64 = 3;
    pub const HISTORY_CHANGE: u64 = 4;
    pub const RESYNC: u64 = 5;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    SetRenderNum(u64),
    Patch(PatchOp),
    ExtractProperty {
        descriptor: u64,
        path: Path,
        name: String,
    },
    Evaluate {
        descriptor: u64,
        code: String,
    },
    Redirect(String),
    SetTitle(String),
    ChangePageUrl(String),
    /// Empty the document container before a full resync.
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    CallbackAck {
        seq: u64,
    },
    DomEvent {
        render_num: u64,
        path: Path,
        event_type: String,
        /// Event payload as the client serialized it (JSON text).
        data: String,
    },
    ResolveProperty {
        descriptor: u64,
        ok: bool,
        value: String,
    },
    EvaluateResult {
        descriptor: u64,
        ok: bool,
        value: String,
    },
    HistoryChange {
        url: String,
    },
    Resync,
}

/// A decoded server frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerFrame {
    pub seq: u64,
    pub messages: Vec<ServerMessage>,
}

impl ServerMessage {
    fn encode_into(&self, frame: &mut Frame) {
        use server_op::*;
        match self {
            Self::SetRenderNum(n) => {
                frame.push(SET_RENDER_NUM).push(*n);
            }
            Self::Patch(op) => encode_patch(op, frame),
            Self::ExtractProperty {
                descriptor,
                path,
                name,
            } => {
                frame
                    .push(EXTRACT_PROPERTY)
                    .push(*descriptor)
                    .push(path)
                    .push(name.as_str());
            }
            Self::Evaluate { descriptor, code } => {
                frame.push(EVALUATE).push(*descriptor).push(code.as_str());
            }
            Self::Redirect(url) => {
                frame.push(REDIRECT).push(url.as_str());
            }
            Self::SetTitle(title) => {
                frame.push(SET_TITLE).push(title.as_str());
            }
            Self::ChangePageUrl(url) => {
                frame.push(CHANGE_PAGE_URL).push(url.as_str());
            }
            Self::Clear => {
                frame.push(CLEAR);
            }
        }
    }
}

fn encode_patch(op: &PatchOp, frame: &mut Frame) {
    use server_op::*;
    match op {
        PatchOp::CreateElement { path, tag } => {
            frame.push(CREATE_ELEMENT).push(path).push(tag.as_str());
        }
        PatchOp::CreateText { path, text } => {
            frame.push(CREATE_TEXT).push(path).push(text.as_str());
        }
        PatchOp::Remove { path } => {
            frame.push(REMOVE_NODE).push(path);
        }
        PatchOp::SetAttribute {
            path,
            key,
            value,
            is_property,
        } => {
            frame
                .push(SET_ATTR)
                .push(path)
                .push(key.as_str())
                .push(value.as_str())
                .push(*is_property);
        }
        PatchOp::RemoveAttribute { path, key } => {
            frame.push(REMOVE_ATTR).push(path).push(key.as_str());
        }
        PatchOp::SetStyle { path, key, value } => {
            frame
                .push(SET_STYLE)
                .push(path)
                .push(key.as_str())
                .push(value.as_str());
        }
        PatchOp::RemoveStyle { path, key } => {
            frame.push(REMOVE_STYLE).push(path).push(key.as_str());
        }
        PatchOp::SetProperty { path, key, value } => {
            frame
                .push(SET_PROPERTY)
                .push(path)
                .push(key.as_str())
                .push(value.as_str());
        }
        PatchOp::AddEventListener {
            path,
            event_type,
            prevent_default,
        } => {
            frame
                .push(ADD_EVENT_LISTENER)
                .push(path)
                .push(event_type.as_str())
                .push(*prevent_default);
        }
        PatchOp::RemoveEventListener { path, event_type } => {
            frame
                .push(REMOVE_EVENT_LISTENER)
                .push(path)
                .push(event_type.as_str());
        }
    }
}

impl ServerFrame {
    pub fn new(seq: u64, messages: Vec<ServerMessage>) -> Self {
        Self { seq, messages }
    }

    pub fn encode(&self) -> Frame {
        encode_server(self.seq, &self.messages)
    }

    pub fn decode(frame: &Frame) -> Result<Self, BridgeError> {
        let mut r = frame.reader();
        if r.uint()? != server_op::FRAME {
            return Err(BridgeError::protocol("server frame must open with Frame(seq)"));
        }
        let seq = r.uint()?;
        let mut messages = Vec::new();
        while !r.is_done() {
            let opcode = r.uint()?;
            let decode = SERVER_DECODERS
                .get(opcode as usize)
                .ok_or_else(|| unknown_opcode(opcode, r.position()))?;
            messages.push(decode(&mut r)?);
        }
        Ok(Self { seq, messages })
    }
}

pub fn encode_server(seq: u64, messages: &[ServerMessage]) -> Frame {
    let mut frame = Frame::new();
    frame.push(server_op::FRAME).push(seq);
    for msg in messages {
        msg.encode_into(&mut frame);
    }
    frame
}

impl ClientMessage {
    fn encode_into(&self, frame: &mut Frame) {
        use client_op::*;
        match self {
            Self::CallbackAck { seq } => {
                frame.push(CALLBACK_ACK).push(*seq);
            }
            Self::DomEvent {
                render_num,
                path,
                event_type,
                data,
            } => {
                frame
                    .push(DOM_EVENT)
                    .push(*render_num)
                    .push(path)
                    .push(event_type.as_str())
                    .push(data.as_str());
            }
            Self::ResolveProperty {
                descriptor,
                ok,
                value,
            } => {
                frame
                    .push(RESOLVE_PROPERTY)
                    .push(*descriptor)
                    .push(*ok)
                    .push(value.as_str());
            }
            Self::EvaluateResult {
                descriptor,
                ok,
                value,
            } => {
                frame
                    .push(EVALUATE_RESULT)
                    .push(*descriptor)
                    .push(*ok)
                    .push(value.as_str());
            }
            Self::HistoryChange { url } => {
                frame.push(HISTORY_CHANGE).push(url.as_str());
            }
            Self::Resync => {
                frame.push(RESYNC);
            }
        }
    }
}

pub fn encode_client(messages: &[ClientMessage]) -> Frame {
    let mut frame = Frame::new();
    for msg in messages {
        msg.encode_into(&mut frame);
    }
    frame
}

/// Decode every message in a client frame. Any malformed message rejects
/// the whole frame.
pub fn decode_client(frame: &Frame) -> Result<Vec<ClientMessage>, BridgeError> {
    let mut r = frame.reader();
    if r.is_done() {
        return Err(BridgeError::protocol("empty frame"));
    }
    let mut messages = Vec::new();
    while !r.is_done() {
        let opcode = r.uint()?;
        let decode = CLIENT_DECODERS
            .get(opcode as usize)
            .ok_or_else(|| unknown_opcode(opcode, r.position()))?;
        messages.push(decode(&mut r)?);
    }
    Ok(messages)
}

fn unknown_opcode(opcode: u64, pos: usize) -> BridgeError {
    BridgeError::protocol(format!("unknown opcode {opcode} at position {}", pos - 1))
}

type ClientDecoder = fn(&mut FrameReader<'_>) -> Result<ClientMessage, BridgeError>;

static CLIENT_DECODERS: [ClientDecoder; 6] = [
    |r| Ok(ClientMessage::CallbackAck { seq: r.uint()? }),
    |r| {
        Ok(ClientMessage::DomEvent {
            render_num: r.uint()?,
            path: r.path()?,
            event_type: r.string()?,
            data: r.string()?,
        })
    },
    |r| {
        Ok(ClientMessage::ResolveProperty {
            descriptor: r.uint()?,
            ok: r.boolean()?,
            value: r.string()?,
        })
    },
    |r| {
        Ok(ClientMessage::EvaluateResult {
            descriptor: r.uint()?,
            ok: r.boolean()?,
            value: r.string()?,
        })
    },
    |r| Ok(ClientMessage::HistoryChange { url: r.string()? }),
    |_| Ok(ClientMessage::Resync),
];

type ServerDecoder = fn(&mut FrameReader<'_>) -> Result<ServerMessage, BridgeError>;

fn patch(op: PatchOp) -> Result<ServerMessage, BridgeError> {
    Ok(ServerMessage::Patch(op))
}

static SERVER_DECODERS: [ServerDecoder; 18] = [
    |_| Err(BridgeError::protocol("Frame header inside a frame")),
    |r| Ok(ServerMessage::SetRenderNum(r.uint()?)),
    |r| {
        patch(PatchOp::CreateElement {
            path: r.path()?,
            tag: r.string()?,
        })
    },
    |r| {
        patch(PatchOp::CreateText {
            path: r.path()?,
            text: r.string()?,
        })
    },
    |r| patch(PatchOp::Remove { path: r.path()? }),
    |r| {
        patch(PatchOp::SetAttribute {
            path: r.path()?,
            key: r.string()?,
            value: r.string()?,
            is_property: r.boolean()?,
        })
    },
    |r| {
        patch(PatchOp::RemoveAttribute {
            path: r.path()?,
            key: r.string()?,
        })
    },
    |r| {
        patch(PatchOp::SetStyle {
            path: r.path()?,
            key: r.string()?,
            value: r.string()?,
        })
    },
    |r| {
        patch(PatchOp::RemoveStyle {
            path: r.path()?,
            key: r.string()?,
        })
    },
    |r| {
        patch(PatchOp::SetProperty {
            path: r.path()?,
            key: r.string()?,
            value: r.string()?,
        })
    },
    |r| {
        patch(PatchOp::AddEventListener {
            path: r.path()?,
            event_type: r.string()?,
            prevent_default: r.boolean()?,
        })
    },
    |r| {
        patch(PatchOp::RemoveEventListener {
            path: r.path()?,
            event_type: r.string()?,
        })
    },
    |r| {
        Ok(ServerMessage::ExtractProperty {
            descriptor: r.uint()?,
            path: r.path()?,
            name: r.string()?,
        })
    },
    |r| {
        Ok(ServerMessage::Evaluate {
            descriptor: r.uint()?,
            code: r.string()?,
        })
    },
    |r| Ok(ServerMessage::Redirect(r.string()?)),
    |r| Ok(ServerMessage::SetTitle(r.string()?)),
    |r| Ok(ServerMessage::ChangePageUrl(r.string()?)),
    |_| Ok(ServerMessage::Clear),
];
