pub mod emotion;
pub mod gemini_generator;
pub mod generator;
pub mod prompts;
pub mod protocol;
pub mod redact;
pub mod registry;
pub mod section;
pub mod session_state;

pub use generator::{Generator, TextStream};
pub use protocol::{Action, InboundEvent, Outbound};
pub use registry::{Registry, SessionId, SessionLease};
pub use section::{Section, parse_sections};
pub use session_state::{Disconnected, TurnPolicy, WalkthroughPhase, WalkthroughSession};
