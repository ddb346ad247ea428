//! Command and result wire strings.
//!
//! A command is a single UTF-8 payload: a decimal request id, `:`, a
//! two-digit zero-padded operation id, then the argument. A result echoes
//! the request id followed by `+` (success) or `!` (widget fault) and the
//! payload text. The request id is the correlation key, so two otherwise
//! identical concurrent commands stay distinguishable.

use std::fmt;

use thiserror::Error;

/// Width of the operation-id field at the front of every command body.
pub const COMMAND_RESERVED_LENGTH: usize = 2;

/// Success text for operations with no meaningful return value.
pub const DONE: &str = "done";

const RESULT_OK_MARK: char = '+';
const RESULT_FAULT_MARK: char = '!';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Operation id outside the dispatch table: a version mismatch
    /// between driver and remote.
    #[error("unknown operation id {op:02} (request {request})")]
    UnknownOperation { request: u64, op: u8 },

    #[error("malformed wire payload: {0}")]
    Malformed(String),

    /// Click argument without a recognizable selector-kind prefix.
    #[error("invalid selector discriminator: {0:?}")]
    InvalidSelector(String),
}

/// Operations the remote executes against the widget.
///
/// Ids are stable for the lifetime of a session; adding an operation
/// means appending an id, never renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    RunScript,
    Navigate,
    Click,
    Hide,
    Show,
    SetPage,
    Close,
    CurrentUrl,
}

impl OpCode {
    pub const ALL: [OpCode; 8] = [
        OpCode::RunScript,
        OpCode::Navigate,
        OpCode::Click,
        OpCode::Hide,
        OpCode::Show,
        OpCode::SetPage,
        OpCode::Close,
        OpCode::CurrentUrl,
    ];

    pub fn id(self) -> u8 {
        match self {
            OpCode::RunScript => 0,
            OpCode::Navigate => 1,
            OpCode::Click => 2,
            OpCode::Hide => 3,
            OpCode::Show => 4,
            OpCode::SetPage => 5,
            OpCode::Close => 6,
            OpCode::CurrentUrl => 7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(OpCode::RunScript),
            1 => Some(OpCode::Navigate),
            2 => Some(OpCode::Click),
            3 => Some(OpCode::Hide),
            4 => Some(OpCode::Show),
            5 => Some(OpCode::SetPage),
            6 => Some(OpCode::Close),
            7 => Some(OpCode::CurrentUrl),
            _ => None,
        }
    }

    /// Short name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::RunScript => "js",
            OpCode::Navigate => "url",
            OpCode::Click => "click",
            OpCode::Hide => "hide",
            OpCode::Show => "show",
            OpCode::SetPage => "page",
            OpCode::Close => "close",
            OpCode::CurrentUrl => "current_url",
        }
    }
}

/// Zero-pad an operation id to the reserved width.
pub fn format_op_id(id: u8) -> String {
    format!("{id:02}")
}

/// Monotonically increasing correlation id, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One command as it travels driver-to-remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand {
    pub id: RequestId,
    pub op: OpCode,
    pub arg: String,
}

impl WireCommand {
    pub fn encode(&self) -> String {
        format!("{}:{}{}", self.id, format_op_id(self.op.id()), self.arg)
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (id_text, body) = raw.split_once(':').ok_or_else(|| {
            ProtocolError::Malformed(format!("missing request id separator: {raw:?}"))
        })?;
        let request: u64 = id_text
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad request id: {id_text:?}")))?;

        if body.len() < COMMAND_RESERVED_LENGTH || !body.is_char_boundary(COMMAND_RESERVED_LENGTH) {
            return Err(ProtocolError::Malformed(format!(
                "truncated command body: {body:?}"
            )));
        }
        let (op_text, arg) = body.split_at(COMMAND_RESERVED_LENGTH);
        let op_id: u8 = op_text
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad operation id: {op_text:?}")))?;
        let op =
            OpCode::from_id(op_id).ok_or(ProtocolError::UnknownOperation { request, op: op_id })?;

        Ok(Self {
            id: RequestId(request),
            op,
            arg: arg.to_string(),
        })
    }
}

/// What one command produced on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    /// Widget-reported fault; the text is the captured diagnostics.
    Fault(String),
}

/// One result as it travels remote-to-driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResult {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl WireResult {
    pub fn success(id: RequestId, text: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Success(text.into()),
        }
    }

    pub fn done(id: RequestId) -> Self {
        Self::success(id, DONE)
    }

    pub fn fault(id: RequestId, text: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Fault(text.into()),
        }
    }

    pub fn encode(&self) -> String {
        match &self.outcome {
            Outcome::Success(text) => format!("{}:{}{}", self.id, RESULT_OK_MARK, text),
            Outcome::Fault(text) => format!("{}:{}{}", self.id, RESULT_FAULT_MARK, text),
        }
    }

    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (id_text, body) = raw.split_once(':').ok_or_else(|| {
            ProtocolError::Malformed(format!("missing request id separator: {raw:?}"))
        })?;
        let request: u64 = id_text
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad request id: {id_text:?}")))?;

        let mut chars = body.chars();
        let outcome = match chars.next() {
            Some(RESULT_OK_MARK) => Outcome::Success(chars.as_str().to_string()),
            Some(RESULT_FAULT_MARK) => Outcome::Fault(chars.as_str().to_string()),
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "missing result marker: {body:?}"
                )));
            }
        };

        Ok(Self {
            id: RequestId(request),
            outcome,
        })
    }
}

/// How a click selector is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Css,
    Xpath,
}

impl SelectorKind {
    /// Discriminator prepended to the selector on the wire.
    pub fn wire_prefix(self) -> &'static str {
        match self {
            SelectorKind::Css => "css ",
            SelectorKind::Xpath => "xpath",
        }
    }

    /// Split a click argument into its kind and bare selector.
    pub fn split(arg: &str) -> Result<(SelectorKind, &str), ProtocolError> {
        if let Some(rest) = arg.strip_prefix(SelectorKind::Css.wire_prefix()) {
            Ok((SelectorKind::Css, rest))
        } else if let Some(rest) = arg.strip_prefix(SelectorKind::Xpath.wire_prefix()) {
            Ok((SelectorKind::Xpath, rest))
        } else {
            Err(ProtocolError::InvalidSelector(
                arg.chars().take(8).collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_ids_are_stable() {
        let table = [
            (OpCode::RunScript, 0, "js"),
            (OpCode::Navigate, 1, "url"),
            (OpCode::Click, 2, "click"),
            (OpCode::Hide, 3, "hide"),
            (OpCode::Show, 4, "show"),
            (OpCode::SetPage, 5, "page"),
            (OpCode::Close, 6, "close"),
            (OpCode::CurrentUrl, 7, "current_url"),
        ];
        for (op, id, name) in table {
            assert_eq!(op.id(), id);
            assert_eq!(op.name(), name);
            assert_eq!(OpCode::from_id(id), Some(op));
        }
        assert_eq!(OpCode::from_id(8), None);
    }

    #[test]
    fn formatting_is_two_digits_for_all_ids() {
        for id in 0..=99u8 {
            let text = format_op_id(id);
            assert_eq!(text.len(), COMMAND_RESERVED_LENGTH);
            assert_eq!(text.parse::<u8>().unwrap(), id);
        }
    }

    #[test]
    fn commands_roundtrip() {
        let args = [
            "",
            "http://localhost:9000/a?b=1",
            "css #btn",
            "path:with:colons",
            "ünïcode",
        ];
        for op in OpCode::ALL {
            for arg in args {
                let cmd = WireCommand {
                    id: RequestId(42),
                    op,
                    arg: arg.to_string(),
                };
                assert_eq!(WireCommand::decode(&cmd.encode()).unwrap(), cmd);
            }
        }
    }

    #[test]
    fn command_encoding_is_fixed_prefix() {
        let cmd = WireCommand {
            id: RequestId(7),
            op: OpCode::Navigate,
            arg: "http://x.dev/".to_string(),
        };
        assert_eq!(cmd.encode(), "7:01http://x.dev/");
    }

    #[test]
    fn unknown_op_carries_the_request_id() {
        assert_eq!(
            WireCommand::decode("7:42xyz"),
            Err(ProtocolError::UnknownOperation { request: 7, op: 42 })
        );
    }

    #[test]
    fn malformed_commands_are_rejected() {
        for raw in ["no-separator", ":01x", "9:0", "9:xx", "abc:01x"] {
            assert!(
                matches!(WireCommand::decode(raw), Err(ProtocolError::Malformed(_))),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn results_roundtrip() {
        let results = [
            WireResult::success(RequestId(1), "http://x.dev/"),
            WireResult::success(RequestId(2), ""),
            WireResult::done(RequestId(3)),
            WireResult::fault(RequestId(4), "script fault: boom"),
        ];
        for result in results {
            assert_eq!(WireResult::decode(&result.encode()).unwrap(), result);
        }
    }

    #[test]
    fn result_markers_are_visible_on_the_wire() {
        assert_eq!(WireResult::done(RequestId(3)).encode(), "3:+done");
        assert_eq!(WireResult::fault(RequestId(3), "boom").encode(), "3:!boom");
    }

    #[test]
    fn results_without_marker_are_rejected() {
        assert!(matches!(
            WireResult::decode("5:done"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn selector_prefixes_split() {
        assert_eq!(
            SelectorKind::split("css #login").unwrap(),
            (SelectorKind::Css, "#login")
        );
        assert_eq!(
            SelectorKind::split("xpath//button").unwrap(),
            (SelectorKind::Xpath, "//button")
        );
        assert!(matches!(
            SelectorKind::split("tag div"),
            Err(ProtocolError::InvalidSelector(_))
        ));
    }
}
