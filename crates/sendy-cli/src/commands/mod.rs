pub mod chat;
pub mod demo;
pub mod keygen;
pub mod router;
