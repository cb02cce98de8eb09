pub(crate) mod markers;
pub(crate) mod rhai_bridge;
pub(crate) mod text;
