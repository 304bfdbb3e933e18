use std::fmt;

/// Identifier of a single runner process, generated anew on every start.
pub type RunnerId = String;

const STOPPED: &str = "stopped";
const LOOP_ID_INFIX: &str = "-loop-id=";

const PHASE_REQUESTED: &str = "requested";
const PHASE_GRANTED: &str = "granted";
const PHASE_RUNNING: &str = "running";

/// Value stored under the coordination key of an exclusive runner.
///
/// The wire format is `<phase>-loop-id=<runner id>` for the three active
/// phases and the bare sentinel `stopped`. Runner ids are opaque and compared
/// byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemaphoreRecord {
    /// No loop runs and nobody asked for the slot.
    Stopped,
    /// A runner asked the active loop to hand the slot over.
    Requested(RunnerId),
    /// The active loop stopped in favour of the requester.
    Granted(RunnerId),
    /// A runner holds exclusivity and executes ticks.
    Running(RunnerId),
}

impl SemaphoreRecord {
    /// Parses a stored value. `None` means the value was written by something
    /// that does not speak this protocol; callers treat it defensively.
    pub fn parse(value: &str) -> Option<Self> {
        if value == STOPPED {
            return Some(SemaphoreRecord::Stopped);
        }
        let (phase, id) = value.split_once(LOOP_ID_INFIX)?;
        if id.is_empty() {
            return None;
        }
        let record = match phase {
            PHASE_REQUESTED => SemaphoreRecord::Requested(id.to_string()),
            PHASE_GRANTED => SemaphoreRecord::Granted(id.to_string()),
            PHASE_RUNNING => SemaphoreRecord::Running(id.to_string()),
            _ => return None,
        };
        Some(record)
    }
}

impl fmt::Display for SemaphoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemaphoreRecord::Stopped => f.write_str(STOPPED),
            SemaphoreRecord::Requested(id) => write!(f, "{PHASE_REQUESTED}{LOOP_ID_INFIX}{id}"),
            SemaphoreRecord::Granted(id) => write!(f, "{PHASE_GRANTED}{LOOP_ID_INFIX}{id}"),
            SemaphoreRecord::Running(id) => write!(f, "{PHASE_RUNNING}{LOOP_ID_INFIX}{id}"),
        }
    }
}
