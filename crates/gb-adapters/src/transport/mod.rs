pub mod sse;
pub mod ws;
