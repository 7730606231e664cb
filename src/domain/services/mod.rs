pub mod batch_token_manager;
pub mod broadcast_dispatcher;
pub mod order_reconciler;
pub mod token_manager;

#[cfg(test)]
pub(crate) mod fakes;
