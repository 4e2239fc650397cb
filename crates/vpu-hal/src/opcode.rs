use core::fmt;

/// Commands understood by the decode engine.
///
/// The raw values match the command numbers written to the engine's command register.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Init = 0,
    ParseSequenceHeader = 1,
    RegisterFrameBuffers = 2,
    DecodeFrame = 3,
    FlushOutput = 4,
    ClearBufferFlag = 5,
    Close = 6,
    GetRingBufferStatus = 7,
    FeedRingBuffer = 8,
    GetVersion = 9,
    SwReset = 10,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::Init,
        Opcode::ParseSequenceHeader,
        Opcode::RegisterFrameBuffers,
        Opcode::DecodeFrame,
        Opcode::FlushOutput,
        Opcode::ClearBufferFlag,
        Opcode::Close,
        Opcode::GetRingBufferStatus,
        Opcode::FeedRingBuffer,
        Opcode::GetVersion,
        Opcode::SwReset,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Whether the engine raises a completion interrupt for this command.
    ///
    /// The coordinator must observe that interrupt (within its bound) before the command is
    /// considered complete.
    pub fn requires_confirmation(self) -> bool {
        matches!(
            self,
            Opcode::Init
                | Opcode::ParseSequenceHeader
                | Opcode::DecodeFrame
                | Opcode::FlushOutput
                | Opcode::Close
                | Opcode::SwReset
        )
    }

    /// Whether `arg2` carries the length of an input bitstream chunk.
    pub fn carries_input(self) -> bool {
        matches!(self, Opcode::DecodeFrame | Opcode::FeedRingBuffer)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Init => "INIT",
            Opcode::ParseSequenceHeader => "PARSE_SEQUENCE_HEADER",
            Opcode::RegisterFrameBuffers => "REGISTER_FRAME_BUFFERS",
            Opcode::DecodeFrame => "DECODE_FRAME",
            Opcode::FlushOutput => "FLUSH_OUTPUT",
            Opcode::ClearBufferFlag => "CLEAR_BUFFER_FLAG",
            Opcode::Close => "CLOSE",
            Opcode::GetRingBufferStatus => "GET_RING_BUFFER_STATUS",
            Opcode::FeedRingBuffer => "FEED_RING_BUFFER",
            Opcode::GetVersion => "GET_VERSION",
            Opcode::SwReset => "SW_RESET",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_roundtrip_through_all() {
        for (idx, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.as_raw() as usize, idx);
            assert_eq!(Opcode::from_raw(op.as_raw()), Some(*op));
        }
        assert_eq!(Opcode::from_raw(11), None);
        assert_eq!(Opcode::from_raw(u32::MAX), None);
    }

    #[test]
    fn query_commands_do_not_wait_for_interrupts() {
        assert!(Opcode::Init.requires_confirmation());
        assert!(Opcode::DecodeFrame.requires_confirmation());
        assert!(Opcode::Close.requires_confirmation());
        assert!(!Opcode::GetVersion.requires_confirmation());
        assert!(!Opcode::GetRingBufferStatus.requires_confirmation());
        assert!(!Opcode::ClearBufferFlag.requires_confirmation());
    }

    #[test]
    fn display_uses_command_names() {
        assert_eq!(Opcode::DecodeFrame.to_string(), "DECODE_FRAME");
        assert_eq!(format!("{}", Opcode::SwReset), "SW_RESET");
    }
}
