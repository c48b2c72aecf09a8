pub(crate) mod slot;
pub(crate) mod waiter;
