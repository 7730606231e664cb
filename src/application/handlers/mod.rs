pub mod broadcast_handler;
