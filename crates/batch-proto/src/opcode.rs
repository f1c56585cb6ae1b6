/// Wire opcode. The historical protocol this one frame belongs to has a
/// large catalog; only `BLAUNCH_RUSAGE` is implemented here, so the type
/// stays an open newtype rather than an exhaustive enum — unrecognized
/// opcodes still round-trip instead of failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u32);

impl Opcode {
    /// Launcher → host daemon: a compacted task-usage aggregate.
    pub const BLAUNCH_RUSAGE: Opcode = Opcode(1);
}

impl From<u32> for Opcode {
    fn from(v: u32) -> Self {
        Opcode(v)
    }
}

impl From<Opcode> for u32 {
    fn from(o: Opcode) -> Self {
        o.0
    }
}

/// Reply status, carried back in the header's opcode field on a response
/// frame (`0` success, nonzero an error code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}
