pub(crate) mod analytics;
pub(crate) mod exam_loader;
pub(crate) mod pending_results;
pub(crate) mod result_sink;
pub(crate) mod session_registry;
