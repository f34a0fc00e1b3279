pub(crate) mod lifecycle;
pub(crate) mod monitor;
pub(crate) mod navigator;
pub(crate) mod registry;
pub(crate) mod session;
pub(crate) mod timer;
