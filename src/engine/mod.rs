//! Single-attempt exam engine: countdown, ordering, integrity monitoring, grading,
//! and the session state machine tying them together. Nothing in here performs I/O;
//! time comes from an injected [`clock::Clock`] and results leave through
//! [`session::ResultHandoff`].

pub(crate) mod clock;
pub(crate) mod grader;
pub(crate) mod integrity;
pub(crate) mod randomizer;
pub(crate) mod session;
pub(crate) mod timer;
