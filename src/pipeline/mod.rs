pub mod ack;
pub mod cancel;
pub mod chain;
pub mod retry;
pub mod runtime;
pub mod transform;
