pub mod frame;
pub mod opcode;

pub use frame::{read_frame, write_frame, Header, ProtoError, HEADER_LEN, MAX_FRAME_LEN};
pub use opcode::{Opcode, StatusCode};

use batch_core::JRusage;
use serde::{Deserialize, Serialize};

/// Payload of a `BLAUNCH_RUSAGE` frame: the launcher's compacted usage
/// report for one job, addressed to the local host daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlaunchRusageMsg {
    pub job_id: i32,
    pub usage: JRusage,
}
